//! Build locks.
//!
//! One build at a time may deploy to a target namespace. The build holding
//! the right owns the lock record `jx-lock-<namespace>` in the coordination
//! namespace.
//!
//! # Lock Records
//!
//! Lock records are created with **exclusive create** semantics: only one
//! claimant can create a given record. A record is kept alive by either:
//! - its owning pod, while the pod is pending, running or unknown, or
//! - its `expires` annotation, for pipelines interpreted outside a pod.
//!
//! A record nothing keeps alive anymore is stale; the next claimant removes it.
//!
//! # Priority
//!
//! Claimants that find the lock taken register themselves as next in line
//! by rewriting the record's data, then wait. A newer build of the same
//! pipeline, or a later claim of another pipeline, takes the place over;
//! the displaced claimant fails with a priority error.
//!
//! # Release
//!
//! Acquisition returns a [`LockGuard`]. Releasing it deletes the record, only
//! if it still is the record that was created.

mod compare;
mod guard;
mod operations;
mod record;
mod types;
mod watcher;


// Re-export public API
pub use compare::compare_builds;
pub use guard::LockGuard;
pub use operations::{acquire, acquire_build_lock, clear_lock, list_locks};
pub use record::{
    EXPIRES_KEY, KIND_LABEL, KIND_VALUE, LOCK_NAME_PREFIX, LockData, LockRecord, OwnerLink,
    POD_KIND, format_time, lock_name,
};
pub use types::{Holder, LockInfo};
