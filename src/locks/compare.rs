//! Priority between two claims on the same lock.

use super::record::{LockData, parse_time};
use crate::error::{BuildLockError, Result};
use tracing::warn;

/// Decide whether the claim `new` should replace the claim `old` in a lock.
///
/// - `Ok(None)`: `old` already describes `new`; nothing to write.
/// - `Ok(Some(next))`: `new` has priority; `next` is the data to store so it
///   waits next in line.
/// - `Err(Priority)`: `old` has priority; `new` must give up.
/// - `Err(Store)`: a build number or timestamp could not be parsed.
///
/// Builds of the same owner/repository/branch are ordered by build number.
/// Builds of different pipelines are ordered by claim timestamp.
pub fn compare_builds(old: &LockData, new: &LockData) -> Result<Option<LockData>> {
    if old.same_pipeline(new) {
        if old.build == new.build && old.pod == new.pod && old.expires == new.expires {
            return Ok(None);
        }

        let old_build = parse_build(&old.build)?;
        let new_build = parse_build(&new.build)?;
        if old_build >= new_build {
            warn!("newer build {} is waiting already", old_build);
            return Err(BuildLockError::Priority(format!(
                "newer build {} is waiting already",
                old_build
            )));
        }

        // keep the timestamp monotonic across updates of the same lock
        let old_time = parse_time(&old.timestamp, "timestamp")?;
        let new_time = parse_time(&new.timestamp, "timestamp")?;
        if old_time > new_time {
            Ok(Some(LockData {
                timestamp: old.timestamp.clone(),
                ..new.clone()
            }))
        } else {
            Ok(Some(new.clone()))
        }
    } else {
        let old_time = parse_time(&old.timestamp, "timestamp")?;
        let new_time = parse_time(&new.timestamp, "timestamp")?;
        if new_time > old_time {
            Ok(Some(new.clone()))
        } else {
            warn!(
                "newer build {}/{}/{} #{} from {} is waiting already",
                old.owner, old.repository, old.branch, old.build, old.timestamp
            );
            Err(BuildLockError::Priority(format!(
                "newer build {}/{}/{} #{} from {} is waiting already",
                old.owner, old.repository, old.branch, old.build, old.timestamp
            )))
        }
    }
}

fn parse_build(build: &str) -> Result<i64> {
    build.parse().map_err(|e| {
        warn!("cannot parse the lock's build number {}: {}", build, e);
        BuildLockError::Store(format!(
            "cannot parse the lock's build number '{}': {}",
            build, e
        ))
    })
}
