//! Wait for whatever may free a lock.
//!
//! One wait multiplexes up to three sources: the lock record's watch, the
//! holder pod's watch and, for locks no pod tracks, a timer at the expiry.
//! The subscriptions are dropped when the wait returns.

use super::compare::compare_builds;
use super::record::{LockData, LockRecord};
use super::types::Holder;
use crate::error::{BuildLockError, Result};
use crate::store::{EventStream, LockStore, PodInfo, WatchEvent};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::future;
use tracing::{debug, info, warn};

/// Why a wait ended.
#[derive(Debug, Clone, PartialEq)]
pub(super) enum WatchOutcome {
    /// The lock record changed in a way the claimant must look at.
    LockChanged(LockRecord),
    /// The lock record was deleted.
    LockGone,
    /// The holder pod finished or was deleted.
    PodGone,
    /// The lock expired.
    Expired,
    /// A watch stream ended without an event.
    Interrupted,
}

/// Wait until `record` changes, its holder `pod` goes away, or it expires.
///
/// `pod` is the holder pod for pod-tracked locks and `None` for locks bound to
/// an expiry. It is kept up to date with the pod changes seen while waiting,
/// so a later wait resumes the pod watch from the newest snapshot. Lock
/// changes that `candidate` is already registered in (such as our own
/// registration) do not end the wait.
pub(super) async fn wait_for_change(
    store: &dyn LockStore,
    record: &LockRecord,
    mut pod: Option<&mut PodInfo>,
    candidate: &LockData,
) -> Result<WatchOutcome> {
    let deadline = match pod.as_deref() {
        Some(_) => None,
        None => match record.holder()? {
            Holder::Expiry(at) => Some(at),
            Holder::Pod(_) => None,
        },
    };
    if let Some(at) = deadline
        && at <= Utc::now()
    {
        debug!("lock {} expired at {} already", record.name, at);
        return Ok(WatchOutcome::Expired);
    }

    let mut lock_events = store.watch_lock(record).await?;
    let mut pod_events = match pod.as_deref() {
        Some(pod) => Some(store.watch_pod(pod).await?),
        None => None,
    };
    let expiry = sleep_until(deadline);
    tokio::pin!(expiry);

    loop {
        tokio::select! {
            event = lock_events.next() => match event {
                Some(WatchEvent::Added(changed)) | Some(WatchEvent::Modified(changed)) => {
                    if let Ok(None) = compare_builds(&changed.data, candidate) {
                        debug!("lock {} changed, still registered as next", changed.name);
                        continue;
                    }
                    return Ok(WatchOutcome::LockChanged(changed));
                }
                Some(WatchEvent::Deleted(_)) => {
                    info!("lock {} was deleted", record.name);
                    return Ok(WatchOutcome::LockGone);
                }
                Some(WatchEvent::Error(message)) => return Err(watch_error(&record.name, &message)),
                None => {
                    debug!("watch on lock {} ended", record.name);
                    return Ok(WatchOutcome::Interrupted);
                }
            },
            event = next_pod_event(&mut pod_events) => match event {
                Some(WatchEvent::Added(changed)) | Some(WatchEvent::Modified(changed)) => {
                    if changed.phase.is_alive() {
                        if let Some(known) = pod.as_deref_mut() {
                            *known = changed;
                        }
                        continue;
                    }
                    info!("pod {} holding lock {} is {}", changed.name, record.name, changed.phase);
                    return Ok(WatchOutcome::PodGone);
                }
                Some(WatchEvent::Deleted(gone)) => {
                    info!("pod {} holding lock {} was deleted", gone.name, record.name);
                    return Ok(WatchOutcome::PodGone);
                }
                Some(WatchEvent::Error(message)) => return Err(watch_error(&record.name, &message)),
                None => {
                    debug!("watch on the pod holding lock {} ended", record.name);
                    return Ok(WatchOutcome::Interrupted);
                }
            },
            () = &mut expiry => {
                info!("lock {} expired", record.name);
                return Ok(WatchOutcome::Expired);
            }
        }
    }
}

async fn next_pod_event(events: &mut Option<EventStream<PodInfo>>) -> Option<WatchEvent<PodInfo>> {
    match events {
        Some(events) => events.next().await,
        None => future::pending().await,
    }
}

async fn sleep_until(deadline: Option<DateTime<Utc>>) {
    match deadline {
        Some(at) => {
            let remaining = (at - Utc::now()).to_std().unwrap_or_default();
            tokio::time::sleep(remaining).await;
        }
        None => future::pending().await,
    }
}

fn watch_error(name: &str, message: &str) -> BuildLockError {
    warn!("watch on lock {} failed: {}", name, message);
    BuildLockError::Store(format!("watch on lock {} failed: {}", name, message))
}
