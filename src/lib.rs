//! Buildlock: one deployment at a time per Kubernetes namespace.
//!
//! Pipelines call [`locks::acquire_build_lock`] before deploying to a target
//! namespace and release the returned [`locks::LockGuard`] when done. The lock
//! is a ConfigMap in the coordination namespace, bound to the lifetime of the
//! pipeline pod or, for pipelines interpreted outside a pod, to an expiry.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod exit_codes;
pub mod identity;
pub mod locks;
pub mod logging;
pub mod store;

pub use config::Config;
pub use error::{BuildLockError, Result};
pub use locks::{LockGuard, acquire, acquire_build_lock};
