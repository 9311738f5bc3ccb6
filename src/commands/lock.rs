//! Implementation of the `buildlock lock` commands.

use crate::cli::{LockClearArgs, LockListArgs};
use crate::error::{BuildLockError, Result};
use crate::locks::{self, LockInfo};
use crate::store::LockStore;
use std::fmt::Write;

/// Render lock details for the terminal.
pub fn render_locks(locks: &[LockInfo]) -> String {
    let mut out = String::new();
    if locks.is_empty() {
        out.push_str("No build locks.\n");
        return out;
    }

    // writing to a String cannot fail
    let _ = writeln!(out, "Build locks ({}):", locks.len());
    for lock in locks {
        let _ = writeln!(out);
        let _ = writeln!(out, "  {}:", lock.name);
        let _ = writeln!(out, "    Namespace:  {}", lock.namespace);
        let _ = writeln!(
            out,
            "    Held by:    {}/{}/{} #{}",
            lock.owner, lock.repository, lock.branch, lock.build
        );
        if let Some(pod) = &lock.pod {
            let _ = writeln!(out, "    Pod:        {}", pod);
        }
        if let Some(expires) = &lock.expires {
            let _ = writeln!(out, "    Expires:    {}", expires);
        }
        if let Some(next) = &lock.next {
            let _ = writeln!(out, "    Next:       {}", next);
        }
        let _ = writeln!(out, "    Age:        {}", lock.age);
        if lock.is_stale {
            let _ = writeln!(out, "    Status:     STALE");
        }
    }

    // Summary
    let stale_count = locks.iter().filter(|l| l.is_stale).count();
    if stale_count > 0 {
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "Note: {} lock(s) are stale. The next build to claim them removes them.",
            stale_count
        );
    }
    out
}

/// Execute the `buildlock lock list` command.
pub async fn cmd_lock_list(store: &dyn LockStore, args: LockListArgs) -> Result<()> {
    let locks = locks::list_locks(store).await?;

    if args.json {
        let json = serde_json::to_string_pretty(&locks).map_err(|e| {
            BuildLockError::Store(format!("failed to serialize locks to JSON: {}", e))
        })?;
        println!("{}", json);
    } else {
        print!("{}", render_locks(&locks));
    }

    Ok(())
}

/// Execute the `buildlock lock clear` command.
pub async fn cmd_lock_clear(store: &dyn LockStore, args: LockClearArgs) -> Result<()> {
    // Require --force flag
    if !args.force {
        return Err(BuildLockError::Configuration(
            "refusing to clear lock without --force flag.\n\n\
             The build holding the lock may still be deploying.\n\
             Only clear locks if you are certain the build is stuck.\n\n\
             To clear the lock, run:\n  buildlock lock clear {} --force"
                .replace("{}", &args.namespace),
        ));
    }

    let cleared = locks::clear_lock(store, &args.namespace).await?;

    println!("Cleared lock: {}", cleared.name);
    println!();
    print!("{}", render_locks(std::slice::from_ref(&cleared)));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{BuildIdentity, ClaimantDescriptor};
    use crate::locks::LockRecord;
    use crate::store::{MemoryStore, PodPhase};

    fn identity() -> BuildIdentity {
        BuildIdentity {
            owner: "my-owner".to_string(),
            repository: "my-repository".to_string(),
            branch: "my-branch".to_string(),
            build: 4,
        }
    }

    #[tokio::test]
    async fn test_render_pod_lock() {
        let store = MemoryStore::new();
        let pod = store.add_pipeline_pod(&identity(), PodPhase::Running);
        store.put_lock(LockRecord::for_claimant(&ClaimantDescriptor::with_pod(
            "staging",
            identity(),
            &pod,
        )));

        let rendered = render_locks(&locks::list_locks(&store).await.unwrap());
        assert!(rendered.contains("Build locks (1):"));
        assert!(rendered.contains("jx-lock-staging"));
        assert!(rendered.contains("my-owner/my-repository/my-branch #4"));
        assert!(rendered.contains(&pod.name));
        assert!(!rendered.contains("STALE"));
    }

    #[tokio::test]
    async fn test_render_stale_lock() {
        let store = MemoryStore::new();
        let pod = store.add_pipeline_pod(&identity(), PodPhase::Failed);
        store.put_lock(LockRecord::for_claimant(&ClaimantDescriptor::with_pod(
            "staging",
            identity(),
            &pod,
        )));

        let rendered = render_locks(&locks::list_locks(&store).await.unwrap());
        assert!(rendered.contains("Status:     STALE"));
        assert!(rendered.contains("1 lock(s) are stale"));
    }

    #[test]
    fn test_render_no_locks() {
        assert_eq!(render_locks(&[]), "No build locks.\n");
    }

    #[tokio::test]
    async fn test_clear_requires_force() {
        let store = MemoryStore::new();
        store.put_lock(LockRecord::for_claimant(&ClaimantDescriptor::interpreted(
            "staging",
            identity(),
        )));

        let args = LockClearArgs {
            namespace: "staging".to_string(),
            force: false,
        };
        let err = cmd_lock_clear(&store, args).await.unwrap_err();
        assert!(err.to_string().contains("--force"));
        assert!(store.lock("jx-lock-staging").is_some());
    }

    #[tokio::test]
    async fn test_clear_with_force() {
        let store = MemoryStore::new();
        store.put_lock(LockRecord::for_claimant(&ClaimantDescriptor::interpreted(
            "staging",
            identity(),
        )));

        let args = LockClearArgs {
            namespace: "staging".to_string(),
            force: true,
        };
        cmd_lock_clear(&store, args).await.unwrap();
        assert!(store.lock("jx-lock-staging").is_none());
    }

    #[tokio::test]
    async fn test_list_as_json() {
        let store = MemoryStore::new();
        cmd_lock_list(&store, LockListArgs { json: true }).await.unwrap();

        let locks = locks::list_locks(&store).await.unwrap();
        assert_eq!(serde_json::to_string(&locks).unwrap(), "[]");
    }
}
