//! Implementation of the `buildlock run` command.
//!
//! Acquires the build lock of the target namespace, runs the command, then
//! releases the lock whatever the command's outcome.

use crate::cli::RunArgs;
use crate::config::Config;
use crate::error::{BuildLockError, Result};
use crate::locks;
use crate::store::LockStore;
use std::sync::Arc;
use tracing::{info, warn};

/// Execute the `buildlock run` command.
pub async fn cmd_run(store: Arc<dyn LockStore>, config: &Config, args: RunArgs) -> Result<()> {
    let guard = locks::acquire_build_lock(store, config, &args.namespace).await?;

    let outcome = run_command(&args.command).await;

    // a lock left behind is reclaimed later, so this is not fatal
    if let Err(e) = guard.release().await {
        warn!("{}", e);
    }

    outcome
}

async fn run_command(command: &[String]) -> Result<()> {
    let Some((program, args)) = command.split_first() else {
        return Err(BuildLockError::Command("no command given".to_string()));
    };

    let shown = command.join(" ");
    info!("running {}", shown);

    let status = tokio::process::Command::new(program)
        .args(args)
        .status()
        .await
        .map_err(|e| BuildLockError::Command(format!("failed to start '{}': {}", program, e)))?;

    if status.success() {
        Ok(())
    } else {
        Err(BuildLockError::Command(format!(
            "'{}' exited with {}",
            shown, status
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{BuildIdentity, ClaimantDescriptor};
    use crate::locks::LockRecord;
    use crate::store::{MemoryStore, PodPhase};

    fn args(command: &[&str]) -> RunArgs {
        RunArgs {
            namespace: "staging".to_string(),
            command: command.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_runs_the_command() {
        let store = Arc::new(MemoryStore::new());

        cmd_run(store, &Config::default(), args(&["true"]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_failing_command_is_a_command_error() {
        let store = Arc::new(MemoryStore::new());

        let err = cmd_run(store, &Config::default(), args(&["false"]))
            .await
            .unwrap_err();
        assert!(matches!(err, BuildLockError::Command(_)));
        assert!(err.to_string().contains("exited with"));
    }

    #[tokio::test]
    async fn test_missing_program_is_a_command_error() {
        let store = Arc::new(MemoryStore::new());

        let err = cmd_run(
            store,
            &Config::default(),
            args(&["buildlock-test-no-such-program"]),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, BuildLockError::Command(_)));
        assert!(err.to_string().contains("failed to start"));
    }

    #[tokio::test]
    async fn test_empty_command_is_rejected() {
        let err = run_command(&[]).await.unwrap_err();
        assert!(matches!(err, BuildLockError::Command(_)));
    }

    #[tokio::test]
    async fn test_invalid_namespace_runs_nothing() {
        let store = Arc::new(MemoryStore::new());

        let err = cmd_run(store, &Config::default(), RunArgs {
            namespace: "-staging".to_string(),
            command: vec!["true".to_string()],
        })
        .await
        .unwrap_err();
        assert!(matches!(err, BuildLockError::Configuration(_)));
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn test_priority_failure_runs_nothing() {
        let store = Arc::new(MemoryStore::new());
        let config = Config::default();
        store.add_deployment(&config.pipeline_controller);

        // build 9 of the same branch holds the lock
        let holder = BuildIdentity {
            owner: "my-owner".to_string(),
            repository: "my-repository".to_string(),
            branch: "my-branch".to_string(),
            build: 9,
        };
        let pod = store.add_pipeline_pod(&holder, PodPhase::Running);
        store.put_lock(LockRecord::for_claimant(&ClaimantDescriptor::with_pod(
            "staging", holder, &pod,
        )));

        // SAFETY: tests touching the environment are serialized
        unsafe {
            std::env::set_var("REPO_OWNER", "my-owner");
            std::env::set_var("REPO_NAME", "my-repository");
            std::env::set_var("BRANCH_NAME", "my-branch");
            std::env::set_var("BUILD_NUMBER", "8");
            std::env::set_var("JX_INTERPRET_PIPELINE", "true");
        }

        let marker = tempfile::NamedTempFile::new().unwrap();
        let path = marker.path().to_path_buf();
        drop(marker);
        let touch = format!("touch {}", path.display());
        let result = cmd_run(store.clone(), &config, args(&["sh", "-c", &touch])).await;

        unsafe {
            for key in [
                "REPO_OWNER",
                "REPO_NAME",
                "BRANCH_NAME",
                "BUILD_NUMBER",
                "JX_INTERPRET_PIPELINE",
            ] {
                std::env::remove_var(key);
            }
        }

        assert!(matches!(result, Err(BuildLockError::Priority(_))));
        assert!(!path.exists());
        assert_eq!(store.lock("jx-lock-staging").unwrap().data.build, "9");
    }
}
