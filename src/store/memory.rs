//! In-process lock store.
//!
//! Behaves like the Kubernetes API for everything the acquisition loop relies
//! on: exclusive create, UID/version preconditions on update and delete, and
//! watches that report every change after the watched snapshot.

use super::{EventStream, LockStore, PodInfo, PodPhase, StoreError, StoreResult, WatchEvent};
use crate::identity::BuildIdentity;
use crate::locks::LockRecord;
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;

const EVENT_BUFFER: usize = 256;

#[derive(Default)]
struct State {
    locks: BTreeMap<String, LockRecord>,
    pods: BTreeMap<String, PodInfo>,
    deployments: BTreeSet<String>,
    last_id: u64,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.last_id += 1;
        self.last_id
    }
}

#[derive(Default)]
struct Calls {
    create: AtomicUsize,
    update: AtomicUsize,
    delete: AtomicUsize,
}

/// In-process [`LockStore`].
pub struct MemoryStore {
    state: Mutex<State>,
    lock_events: broadcast::Sender<(String, WatchEvent<LockRecord>)>,
    pod_events: broadcast::Sender<(String, WatchEvent<PodInfo>)>,
    lock_watches: watch::Sender<usize>,
    calls: Calls,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (lock_events, _) = broadcast::channel(EVENT_BUFFER);
        let (pod_events, _) = broadcast::channel(EVENT_BUFFER);
        let (lock_watches, _) = watch::channel(0);
        Self {
            state: Mutex::new(State::default()),
            lock_events,
            pod_events,
            lock_watches,
            calls: Calls::default(),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    fn publish_lock(&self, event: WatchEvent<LockRecord>) {
        let name = match &event {
            WatchEvent::Added(r) | WatchEvent::Modified(r) | WatchEvent::Deleted(r) => {
                r.name.clone()
            }
            WatchEvent::Error(_) => return,
        };
        // no receiver is not an error
        let _ = self.lock_events.send((name, event));
    }

    fn publish_pod(&self, event: WatchEvent<PodInfo>) {
        let name = match &event {
            WatchEvent::Added(p) | WatchEvent::Modified(p) | WatchEvent::Deleted(p) => {
                p.name.clone()
            }
            WatchEvent::Error(_) => return,
        };
        let _ = self.pod_events.send((name, event));
    }

    // ========================================================================
    // Direct manipulation, as another actor in the cluster would do it
    // ========================================================================

    /// Store a lock record as is, replacing any record with the same name.
    pub fn put_lock(&self, record: LockRecord) -> LockRecord {
        let mut state = self.state();
        let id = state.next_id();
        let mut stored = record;
        stored.uid = Some(format!("lock-uid-{}", id));
        stored.resource_version = Some(id.to_string());
        state.locks.insert(stored.name.clone(), stored.clone());
        self.publish_lock(WatchEvent::Added(stored.clone()));
        stored
    }

    /// Change a stored lock record in place, as a competing claimant would.
    pub fn modify_lock<F>(&self, name: &str, change: F) -> Option<LockRecord>
    where
        F: FnOnce(&mut LockRecord),
    {
        let mut state = self.state();
        let id = state.next_id();
        let record = state.locks.get_mut(name)?;
        change(record);
        record.resource_version = Some(id.to_string());
        let updated = record.clone();
        self.publish_lock(WatchEvent::Modified(updated.clone()));
        Some(updated)
    }

    /// Delete a lock record without precondition.
    pub fn remove_lock(&self, name: &str) -> Option<LockRecord> {
        let removed = self.state().locks.remove(name)?;
        self.publish_lock(WatchEvent::Deleted(removed.clone()));
        Some(removed)
    }

    /// The stored lock record, if any.
    pub fn lock(&self, name: &str) -> Option<LockRecord> {
        self.state().locks.get(name).cloned()
    }

    /// Start a pipeline pod labelled with `identity`.
    pub fn add_pipeline_pod(&self, identity: &BuildIdentity, phase: PodPhase) -> PodInfo {
        let mut state = self.state();
        let id = state.next_id();
        let pod = PodInfo {
            name: format!(
                "pipeline-{}-{}-{}-{}-{}",
                identity.owner, identity.repository, identity.branch, identity.build, id
            ),
            uid: format!("pod-uid-{}", id),
            api_version: "v1".to_string(),
            kind: "Pod".to_string(),
            resource_version: Some(id.to_string()),
            phase,
            labels: identity.pod_selector(),
        };
        state.pods.insert(pod.name.clone(), pod.clone());
        self.publish_pod(WatchEvent::Added(pod.clone()));
        pod
    }

    /// Move a pod to another phase.
    pub fn set_pod_phase(&self, name: &str, phase: PodPhase) -> Option<PodInfo> {
        let mut state = self.state();
        let id = state.next_id();
        let pod = state.pods.get_mut(name)?;
        pod.phase = phase;
        pod.resource_version = Some(id.to_string());
        let updated = pod.clone();
        self.publish_pod(WatchEvent::Modified(updated.clone()));
        Some(updated)
    }

    /// Delete a pod.
    pub fn remove_pod(&self, name: &str) -> Option<PodInfo> {
        let removed = self.state().pods.remove(name)?;
        self.publish_pod(WatchEvent::Deleted(removed.clone()));
        Some(removed)
    }

    /// Install a deployment.
    pub fn add_deployment(&self, name: &str) {
        self.state().deployments.insert(name.to_string());
    }

    // ========================================================================
    // Call accounting
    // ========================================================================

    pub fn create_calls(&self) -> usize {
        self.calls.create.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> usize {
        self.calls.update.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.calls.delete.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` lock watches have been opened in total.
    pub async fn wait_for_lock_watches(&self, count: usize) {
        let mut rx = self.lock_watches.subscribe();
        // the sender lives as long as the store
        let _ = rx.wait_for(|opened| *opened >= count).await;
    }
}

/// Turn a broadcast subscription into the events of a single resource.
fn named_events<T>(
    rx: broadcast::Receiver<(String, WatchEvent<T>)>,
    name: String,
    initial: Option<WatchEvent<T>>,
) -> EventStream<T>
where
    T: Clone + Send + 'static,
{
    let live = stream::unfold(rx, move |mut rx| {
        let name = name.clone();
        async move {
            loop {
                match rx.recv().await {
                    Ok((event_name, event)) if event_name == name => return Some((event, rx)),
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        let event = WatchEvent::Error(format!("watch lagged by {} events", skipped));
                        return Some((event, rx));
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        }
    });
    stream::iter(initial).chain(live).boxed()
}

#[async_trait]
impl LockStore for MemoryStore {
    async fn create_lock(&self, record: &LockRecord) -> StoreResult<LockRecord> {
        self.calls.create.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state();
        if state.locks.contains_key(&record.name) {
            return Err(StoreError::AlreadyExists(format!("configmap {}", record.name)));
        }
        let id = state.next_id();
        let mut stored = record.clone();
        stored.uid = Some(format!("lock-uid-{}", id));
        stored.resource_version = Some(id.to_string());
        state.locks.insert(stored.name.clone(), stored.clone());
        self.publish_lock(WatchEvent::Added(stored.clone()));
        Ok(stored)
    }

    async fn get_lock(&self, name: &str) -> StoreResult<LockRecord> {
        self.state()
            .locks
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("configmap {}", name)))
    }

    async fn update_lock(&self, record: &LockRecord) -> StoreResult<LockRecord> {
        self.calls.update.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state();
        let current = state
            .locks
            .get(&record.name)
            .ok_or_else(|| StoreError::NotFound(format!("configmap {}", record.name)))?;
        if current.uid != record.uid || current.resource_version != record.resource_version {
            return Err(StoreError::Conflict(format!("configmap {}", record.name)));
        }
        let id = state.next_id();
        let mut stored = record.clone();
        stored.resource_version = Some(id.to_string());
        state.locks.insert(stored.name.clone(), stored.clone());
        self.publish_lock(WatchEvent::Modified(stored.clone()));
        Ok(stored)
    }

    async fn delete_lock(&self, name: &str, uid: &str) -> StoreResult<()> {
        self.calls.delete.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state();
        let current = state
            .locks
            .get(name)
            .ok_or_else(|| StoreError::NotFound(format!("configmap {}", name)))?;
        if current.uid.as_deref() != Some(uid) {
            return Err(StoreError::Conflict(format!("configmap {}", name)));
        }
        if let Some(removed) = state.locks.remove(name) {
            self.publish_lock(WatchEvent::Deleted(removed));
        }
        Ok(())
    }

    async fn list_locks(&self) -> StoreResult<Vec<LockRecord>> {
        Ok(self
            .state()
            .locks
            .values()
            .filter(|r| r.has_kind_label())
            .cloned()
            .collect())
    }

    async fn watch_lock(&self, record: &LockRecord) -> StoreResult<EventStream<LockRecord>> {
        let state = self.state();
        let rx = self.lock_events.subscribe();
        // report what changed between the snapshot and the subscription
        let initial = match state.locks.get(&record.name) {
            None => Some(WatchEvent::Deleted(record.clone())),
            Some(current) if current.resource_version != record.resource_version => {
                Some(WatchEvent::Modified(current.clone()))
            }
            Some(_) => None,
        };
        drop(state);
        self.lock_watches.send_modify(|opened| *opened += 1);
        Ok(named_events(rx, record.name.clone(), initial))
    }

    async fn get_pod(&self, name: &str) -> StoreResult<PodInfo> {
        self.state()
            .pods
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("pod {}", name)))
    }

    async fn watch_pod(&self, pod: &PodInfo) -> StoreResult<EventStream<PodInfo>> {
        let state = self.state();
        let rx = self.pod_events.subscribe();
        let initial = match state.pods.get(&pod.name) {
            None => Some(WatchEvent::Deleted(pod.clone())),
            Some(current) if current.resource_version != pod.resource_version => {
                Some(WatchEvent::Modified(current.clone()))
            }
            Some(_) => None,
        };
        drop(state);
        Ok(named_events(rx, pod.name.clone(), initial))
    }

    async fn find_pods(&self, labels: &BTreeMap<String, String>) -> StoreResult<Vec<PodInfo>> {
        Ok(self
            .state()
            .pods
            .values()
            .filter(|pod| {
                labels
                    .iter()
                    .all(|(k, v)| pod.labels.get(k).is_some_and(|actual| actual == v))
            })
            .cloned()
            .collect())
    }

    async fn deployment_exists(&self, name: &str) -> StoreResult<bool> {
        Ok(self.state().deployments.contains(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ClaimantDescriptor;
    use std::time::Duration;

    fn identity() -> BuildIdentity {
        BuildIdentity {
            owner: "my-owner".to_string(),
            repository: "my-repository".to_string(),
            branch: "my-branch".to_string(),
            build: 3,
        }
    }

    fn record() -> LockRecord {
        LockRecord::for_claimant(&ClaimantDescriptor::interpreted("staging", identity()))
    }

    #[tokio::test]
    async fn test_create_is_exclusive() {
        let store = MemoryStore::new();

        let stored = store.create_lock(&record()).await.unwrap();
        assert!(stored.uid.is_some());

        let err = store.create_lock(&record()).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
        assert_eq!(store.create_calls(), 2);
    }

    #[tokio::test]
    async fn test_update_requires_current_version() {
        let store = MemoryStore::new();
        let stored = store.create_lock(&record()).await.unwrap();

        let mut first = stored.clone();
        first.data.build = "4".to_string();
        store.update_lock(&first).await.unwrap();

        // the snapshot is now outdated
        let mut second = stored;
        second.data.build = "5".to_string();
        let err = store.update_lock(&second).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_delete_requires_matching_uid() {
        let store = MemoryStore::new();
        let stored = store.create_lock(&record()).await.unwrap();

        let err = store.delete_lock(&stored.name, "other-uid").await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let uid = stored.uid.clone().unwrap();
        store.delete_lock(&stored.name, &uid).await.unwrap();
        let err = store.delete_lock(&stored.name, &uid).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_watch_reports_changes_after_snapshot() {
        let store = MemoryStore::new();
        let stored = store.create_lock(&record()).await.unwrap();
        let mut events = store.watch_lock(&stored).await.unwrap();

        store.modify_lock(&stored.name, |r| r.data.build = "9".to_string());
        match tokio::time::timeout(Duration::from_secs(1), events.next()).await {
            Ok(Some(WatchEvent::Modified(r))) => assert_eq!(r.data.build, "9"),
            other => panic!("unexpected event: {:?}", other),
        }

        store.remove_lock(&stored.name);
        assert!(matches!(
            tokio::time::timeout(Duration::from_secs(1), events.next()).await,
            Ok(Some(WatchEvent::Deleted(_)))
        ));
    }

    #[tokio::test]
    async fn test_watch_on_outdated_snapshot_reports_current_state() {
        let store = MemoryStore::new();
        let stored = store.create_lock(&record()).await.unwrap();
        store.modify_lock(&stored.name, |r| r.data.build = "9".to_string());

        let mut events = store.watch_lock(&stored).await.unwrap();
        assert!(matches!(events.next().await, Some(WatchEvent::Modified(_))));
    }

    #[tokio::test]
    async fn test_watch_ignores_other_resources() {
        let store = MemoryStore::new();
        let stored = store.create_lock(&record()).await.unwrap();
        let mut events = store.watch_lock(&stored).await.unwrap();

        let mut other = record();
        other.name = "jx-lock-production".to_string();
        store.put_lock(other);

        let next = tokio::time::timeout(Duration::from_millis(100), events.next()).await;
        assert!(next.is_err(), "no event expected");
    }

    #[tokio::test]
    async fn test_find_pods_matches_all_labels() {
        let store = MemoryStore::new();
        let pod = store.add_pipeline_pod(&identity(), PodPhase::Running);

        let found = store.find_pods(&identity().pod_selector()).await.unwrap();
        assert_eq!(found, vec![pod]);

        let mut other = identity();
        other.branch = "other".to_string();
        assert!(store.find_pods(&other.pod_selector()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pod_watch_reports_phase_changes() {
        let store = MemoryStore::new();
        let pod = store.add_pipeline_pod(&identity(), PodPhase::Running);
        let mut events = store.watch_pod(&pod).await.unwrap();

        store.set_pod_phase(&pod.name, PodPhase::Succeeded);
        match events.next().await {
            Some(WatchEvent::Modified(p)) => assert_eq!(p.phase, PodPhase::Succeeded),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_deployments() {
        let store = MemoryStore::new();
        assert!(!store.deployment_exists("tekton-pipelines-controller").await.unwrap());

        store.add_deployment("tekton-pipelines-controller");
        assert!(store.deployment_exists("tekton-pipelines-controller").await.unwrap());
    }
}
