//! Release handle of an acquired lock.

use crate::error::{BuildLockError, Result};
use crate::store::LockStore;
use std::sync::Arc;
use tracing::{info, warn};

/// Handle on an acquired build lock.
///
/// Releasing deletes the lock record, but only the record this guard created:
/// the delete carries the UID observed at acquisition. Deletion is async, so a
/// dropped guard cannot release; it logs a warning and the lock is reclaimed
/// once its pod finishes or it expires.
pub struct LockGuard {
    /// Store holding the lock. `None` for a no-op guard.
    store: Option<Arc<dyn LockStore>>,

    /// Name of the lock record.
    name: String,

    /// UID of the lock record at acquisition.
    uid: String,

    /// Whether the lock has been released.
    released: bool,
}

impl LockGuard {
    pub(super) fn new(store: Arc<dyn LockStore>, name: String, uid: String) -> Self {
        Self {
            store: Some(store),
            name,
            uid,
            released: false,
        }
    }

    /// A guard for a lock that was never needed. Releasing it does nothing.
    pub fn noop() -> Self {
        Self {
            store: None,
            name: String::new(),
            uid: String::new(),
            released: false,
        }
    }

    /// Name of the lock record, empty for a no-op guard.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_noop(&self) -> bool {
        self.store.is_none()
    }

    /// Release the lock.
    ///
    /// A failure leaves the lock in place until its pod finishes or it expires.
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        let Some(store) = self.store.take() else {
            return Ok(());
        };

        match store.delete_lock(&self.name, &self.uid).await {
            Ok(()) => {
                info!("released lock {}", self.name);
                Ok(())
            }
            Err(e) => {
                warn!("failed to release lock {}: {}", self.name, e);
                Err(BuildLockError::Store(format!(
                    "failed to release lock '{}': {}",
                    self.name, e
                )))
            }
        }
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("name", &self.name)
            .field("uid", &self.uid)
            .field("noop", &self.is_noop())
            .field("released", &self.released)
            .finish()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released && self.store.is_some() {
            warn!(
                "lock {} was not released; it stays until its pod finishes or it expires",
                self.name
            );
        }
    }
}
