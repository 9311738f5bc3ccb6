//! Lock acquisition, listing, and clearing operations.

use super::compare::compare_builds;
use super::guard::LockGuard;
use super::record::{LockRecord, lock_name};
use super::types::{Holder, LockInfo};
use super::watcher::{WatchOutcome, wait_for_change};
use crate::config::{Config, validate_namespace};
use crate::error::{BuildLockError, Result};
use crate::identity::{BuildIdentity, ClaimantDescriptor, describe_claimant, interpret_mode_from_env};
use crate::store::{LockStore, PodInfo, StoreError};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where the acquisition loop stands.
#[derive(Debug)]
enum State {
    /// Try to create the lock record.
    Creating,
    /// Read the existing lock record.
    Reading,
    /// Check that the record is a live build lock for our namespace.
    Validating(LockRecord),
    /// Remove a stale or foreign record.
    Deleting(LockRecord),
    /// Register as next in line, or give up to a build with priority.
    Comparing(LockRecord, Option<PodInfo>),
    /// Wait for the holder to go away.
    Waiting(LockRecord, Option<PodInfo>),
}

fn store_failure(action: &str, name: &str, err: StoreError) -> BuildLockError {
    warn!("failed to {} lock {}: {}", action, name, err);
    BuildLockError::Store(format!("failed to {} lock {}: {}", action, name, err))
}

fn holder_of(record: &LockRecord) -> String {
    let label = |key: &str| record.labels.get(key).map(String::as_str).unwrap_or("?");
    format!(
        "{}/{}/{} #{}",
        label("owner"),
        label("repository"),
        label("branch"),
        label("build")
    )
}

/// How an operator removes a lock whose holder will never release it.
pub(super) fn stuck_lock_hint(coordination_namespace: &str, name: &str) -> String {
    format!(
        "delete it with 'kubectl delete configmap -n {} {}'",
        coordination_namespace, name
    )
}

/// Acquire the build lock for the namespace `claimant` targets.
///
/// Blocks until the lock is ours. Fails with a priority error as soon as a
/// build with priority holds or waits for the lock, and with a store error on
/// any unexpected API failure.
pub async fn acquire(
    store: Arc<dyn LockStore>,
    config: &Config,
    claimant: &ClaimantDescriptor,
) -> Result<LockGuard> {
    let ttl = config.lock_ttl();
    let mut candidate = LockRecord::for_claimant(claimant);
    let name = candidate.name.clone();
    // holder pod of the previous wait, reused while it still owns the lock
    let mut known_pod: Option<PodInfo> = None;
    let mut state = State::Creating;

    loop {
        state = match state {
            State::Creating => {
                known_pod = None;
                candidate.refresh_expiry(Utc::now(), ttl);
                debug!("creating lock {} for {}", name, claimant.identity);
                match store.create_lock(&candidate).await {
                    Ok(stored) => {
                        info!("acquired lock {} for {}", name, claimant.identity);
                        let uid = stored.stored_uid()?.to_string();
                        return Ok(LockGuard::new(store, name, uid));
                    }
                    Err(StoreError::AlreadyExists(_)) => {
                        debug!("lock {} exists already", name);
                        State::Reading
                    }
                    Err(e) => return Err(store_failure("create", &name, e)),
                }
            }

            State::Reading => match store.get_lock(&name).await {
                Ok(record) => State::Validating(record),
                Err(StoreError::NotFound(_)) => State::Creating,
                Err(e) => return Err(store_failure("read", &name, e)),
            },

            State::Validating(record) => {
                if !record.has_kind_label()
                    || record.target_namespace() != Some(claimant.namespace.as_str())
                {
                    warn!(
                        "{} is not a build lock for namespace {}, removing it",
                        name, claimant.namespace
                    );
                    State::Deleting(record)
                } else {
                    let (expired, owner) = match record.holder()? {
                        Holder::Expiry(at) => (at <= Utc::now(), None),
                        Holder::Pod(owner) => (false, Some(owner.clone())),
                    };
                    match owner {
                        _ if expired => {
                            info!("lock {} held by {} expired", name, holder_of(&record));
                            State::Deleting(record)
                        }
                        None => State::Comparing(record, None),
                        Some(owner) => {
                            let cached = known_pod
                                .take()
                                .filter(|p| p.name == owner.name && p.uid == owner.uid);
                            let pod = match cached {
                                Some(pod) => Ok(pod),
                                None => store.get_pod(&owner.name).await,
                            };
                            match pod {
                                Ok(pod) if pod.uid != owner.uid => {
                                    info!("pod {} holding lock {} was replaced", owner.name, name);
                                    State::Deleting(record)
                                }
                                Ok(pod) if pod.phase.is_alive() => {
                                    State::Comparing(record, Some(pod))
                                }
                                Ok(pod) => {
                                    info!(
                                        "pod {} holding lock {} is {}",
                                        pod.name, name, pod.phase
                                    );
                                    State::Deleting(record)
                                }
                                Err(StoreError::NotFound(_)) => {
                                    info!("pod {} holding lock {} is gone", owner.name, name);
                                    State::Deleting(record)
                                }
                                Err(e) => return Err(store_failure("check the pod of", &name, e)),
                            }
                        }
                    }
                }
            }

            State::Deleting(record) => {
                info!("removing stale lock {} held by {}", name, holder_of(&record));
                match store.delete_lock(&name, record.stored_uid()?).await {
                    Ok(()) | Err(StoreError::NotFound(_)) => State::Creating,
                    Err(StoreError::Conflict(_)) => {
                        debug!("lock {} changed before removal", name);
                        State::Reading
                    }
                    Err(e) => return Err(store_failure("remove", &name, e)),
                }
            }

            State::Comparing(record, pod) => match compare_builds(&record.data, &candidate.data)? {
                None => {
                    debug!("{} is registered as next for lock {}", claimant.identity, name);
                    State::Waiting(record, pod)
                }
                Some(next) => {
                    // only the data moves; labels and ownership stay the holder's
                    let update = LockRecord {
                        data: next,
                        ..record
                    };
                    match store.update_lock(&update).await {
                        Ok(stored) => {
                            info!(
                                "{} is registered as next for lock {} held by {}",
                                claimant.identity,
                                name,
                                holder_of(&stored)
                            );
                            State::Waiting(stored, pod)
                        }
                        Err(StoreError::Conflict(_)) | Err(StoreError::NotFound(_)) => {
                            debug!("lock {} changed before registration", name);
                            State::Reading
                        }
                        Err(e) => return Err(store_failure("update", &name, e)),
                    }
                }
            },

            State::Waiting(record, mut pod) => {
                info!(
                    "waiting for lock {} held by {}; if it is stuck, {}",
                    name,
                    holder_of(&record),
                    stuck_lock_hint(&config.coordination_namespace, &name)
                );
                let outcome =
                    wait_for_change(store.as_ref(), &record, pod.as_mut(), &candidate.data)
                        .await?;
                known_pod = pod.clone();
                match outcome {
                    WatchOutcome::LockChanged(changed) => State::Comparing(changed, pod),
                    WatchOutcome::LockGone | WatchOutcome::PodGone | WatchOutcome::Expired => {
                        State::Creating
                    }
                    WatchOutcome::Interrupted => {
                        // watches resume from a fresh read of the pod
                        known_pod = None;
                        State::Reading
                    }
                }
            }
        };
    }
}

/// Acquire the build lock of `namespace` for the pipeline run of this process.
///
/// The identity comes from the environment. When the pipeline controller is
/// not installed, pipelines do not run in pods and a no-op guard is returned.
pub async fn acquire_build_lock(
    store: Arc<dyn LockStore>,
    config: &Config,
    namespace: &str,
) -> Result<LockGuard> {
    validate_namespace(namespace, "target namespace")?;

    if config.require_pipeline_controller
        && !store.deployment_exists(&config.pipeline_controller).await?
    {
        info!(
            "{} is not installed, not locking namespace {}",
            config.pipeline_controller, namespace
        );
        return Ok(LockGuard::noop());
    }

    let identity = BuildIdentity::from_env()?;
    let claimant =
        describe_claimant(store.as_ref(), namespace, identity, interpret_mode_from_env()).await?;
    acquire(store, config, &claimant).await
}

/// Whether nothing keeps `record` alive anymore.
async fn is_stale(store: &dyn LockStore, record: &LockRecord) -> Result<bool> {
    match record.holder() {
        Ok(Holder::Expiry(at)) => Ok(at <= Utc::now()),
        Ok(Holder::Pod(owner)) => match store.get_pod(&owner.name).await {
            Ok(pod) => Ok(pod.uid != owner.uid || !pod.phase.is_alive()),
            Err(StoreError::NotFound(_)) => Ok(true),
            Err(e) => Err(e.into()),
        },
        Err(e) => {
            // a malformed lock blocks every claimant until someone clears it
            warn!("{}", e);
            Ok(false)
        }
    }
}

/// List all build locks.
pub async fn list_locks(store: &dyn LockStore) -> Result<Vec<LockInfo>> {
    let mut locks = Vec::new();
    for record in store.list_locks().await? {
        let stale = is_stale(store, &record).await?;
        locks.push(LockInfo::new(&record, stale));
    }

    // Sort by name for consistent output
    locks.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(locks)
}

/// Delete the build lock of `namespace`, whoever holds it.
///
/// This is the operator's escape hatch for a stuck lock. The record read is
/// the record deleted: if it changes in between, nothing is deleted.
pub async fn clear_lock(store: &dyn LockStore, namespace: &str) -> Result<LockInfo> {
    validate_namespace(namespace, "target namespace")?;
    let name = lock_name(namespace);

    let record = match store.get_lock(&name).await {
        Ok(record) => record,
        Err(StoreError::NotFound(_)) => {
            return Err(BuildLockError::Configuration(format!(
                "no lock exists for namespace '{}'",
                namespace
            )));
        }
        Err(e) => return Err(store_failure("read", &name, e)),
    };
    if !record.has_kind_label() {
        return Err(BuildLockError::Configuration(format!(
            "{} is not a build lock",
            name
        )));
    }

    let info = LockInfo::new(&record, is_stale(store, &record).await?);
    store
        .delete_lock(&name, record.stored_uid()?)
        .await
        .map_err(|e| store_failure("clear", &name, e))?;
    info!("cleared lock {} held by {}", name, holder_of(&record));

    Ok(info)
}
