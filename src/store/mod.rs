//! Lock store adapter.
//!
//! The acquisition loop talks to the cluster only through [`LockStore`]:
//! create/read/update/delete/watch on lock records, get/watch on the pod
//! owning a lock, pod discovery by labels and a deployment existence check.
//!
//! Two implementations are provided:
//! - [`KubeLockStore`]: ConfigMaps, Pods and Deployments through the Kubernetes API.
//! - [`MemoryStore`]: an in-process store with the same optimistic concurrency
//!   and watch semantics.
//!
//! `AlreadyExists`, `NotFound` and `Conflict` are protocol signals, not failures:
//! the caller decides what they mean.

mod kubernetes;
mod memory;

pub use kubernetes::KubeLockStore;
pub use memory::MemoryStore;

use crate::locks::LockRecord;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors reported by a lock store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Create failed because a resource with that name exists.
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// The resource does not exist (anymore).
    #[error("{0} not found")]
    NotFound(String),

    /// The resource changed since it was read (UID or version precondition failed).
    #[error("{0} was modified concurrently")]
    Conflict(String),

    /// Any other API failure.
    #[error("{0}")]
    Api(String),
}

/// Result type alias for lock store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A change notification from a watch stream.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent<T> {
    Added(T),
    Modified(T),
    Deleted(T),
    /// The watch failed; the stream should not be polled further.
    Error(String),
}

/// A watch subscription. Dropping the stream unsubscribes.
pub type EventStream<T> = BoxStream<'static, WatchEvent<T>>;

/// Lifecycle phase of a pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    /// Parse a Kubernetes pod phase. A missing or unrecognized phase is `Unknown`.
    pub fn parse(phase: Option<&str>) -> Self {
        match phase {
            Some("Pending") => PodPhase::Pending,
            Some("Running") => PodPhase::Running,
            Some("Succeeded") => PodPhase::Succeeded,
            Some("Failed") => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PodPhase::Pending => "Pending",
            PodPhase::Running => "Running",
            PodPhase::Succeeded => "Succeeded",
            PodPhase::Failed => "Failed",
            PodPhase::Unknown => "Unknown",
        }
    }

    /// Whether a pod in this phase can still be holding a lock.
    pub fn is_alive(&self) -> bool {
        matches!(self, PodPhase::Pending | PodPhase::Running | PodPhase::Unknown)
    }
}

impl std::fmt::Display for PodPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The store's view of a pipeline pod.
#[derive(Debug, Clone, PartialEq)]
pub struct PodInfo {
    pub name: String,
    pub uid: String,
    pub api_version: String,
    pub kind: String,
    pub resource_version: Option<String>,
    pub phase: PodPhase,
    pub labels: BTreeMap<String, String>,
}

/// Storage operations the acquisition loop relies on.
///
/// Lock records live in a single coordination namespace; pods are looked up in
/// that same namespace.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Create a lock record. Fails with `AlreadyExists` when one is present.
    async fn create_lock(&self, record: &LockRecord) -> StoreResult<LockRecord>;

    /// Read a lock record. Fails with `NotFound`.
    async fn get_lock(&self, name: &str) -> StoreResult<LockRecord>;

    /// Replace a lock record. The record's UID and resource version are the
    /// preconditions: fails with `Conflict` if the stored record changed, or
    /// `NotFound` if it is gone.
    async fn update_lock(&self, record: &LockRecord) -> StoreResult<LockRecord>;

    /// Delete a lock record if its UID still matches `uid`.
    async fn delete_lock(&self, name: &str, uid: &str) -> StoreResult<()>;

    /// List every lock record carrying the build-lock kind label.
    async fn list_locks(&self) -> StoreResult<Vec<LockRecord>>;

    /// Watch changes to a lock record after the given snapshot.
    async fn watch_lock(&self, record: &LockRecord) -> StoreResult<EventStream<LockRecord>>;

    /// Read a pod by name. Fails with `NotFound`.
    async fn get_pod(&self, name: &str) -> StoreResult<PodInfo>;

    /// Watch changes to a pod after the given snapshot.
    async fn watch_pod(&self, pod: &PodInfo) -> StoreResult<EventStream<PodInfo>>;

    /// List pods carrying all of the given labels.
    async fn find_pods(&self, labels: &BTreeMap<String, String>) -> StoreResult<Vec<PodInfo>>;

    /// Whether a deployment with this name exists.
    async fn deployment_exists(&self, name: &str) -> StoreResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pod_phase_liveness() {
        assert!(PodPhase::Pending.is_alive());
        assert!(PodPhase::Running.is_alive());
        assert!(PodPhase::Unknown.is_alive());
        assert!(!PodPhase::Succeeded.is_alive());
        assert!(!PodPhase::Failed.is_alive());
    }

    #[test]
    fn test_pod_phase_parse() {
        assert_eq!(PodPhase::parse(Some("Running")), PodPhase::Running);
        assert_eq!(PodPhase::parse(Some("Failed")), PodPhase::Failed);
        assert_eq!(PodPhase::parse(Some("Evicted")), PodPhase::Unknown);
        assert_eq!(PodPhase::parse(None), PodPhase::Unknown);
    }

    #[test]
    fn test_store_error_messages() {
        let err = StoreError::AlreadyExists("configmap jx-lock-staging".to_string());
        assert_eq!(err.to_string(), "configmap jx-lock-staging already exists");

        let err = StoreError::Conflict("configmap jx-lock-staging".to_string());
        assert!(err.to_string().contains("modified concurrently"));
    }
}
