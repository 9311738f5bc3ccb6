//! Lock holder and listing types.

use super::record::{LockRecord, OwnerLink};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// What keeps a lock alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Holder<'a> {
    /// The lock lives as long as this pod is pending or running.
    Pod(&'a OwnerLink),
    /// No pod tracks the lock; it is valid until this instant.
    Expiry(DateTime<Utc>),
}

/// Information about an existing lock, for operators.
#[derive(Debug, Clone, Serialize)]
pub struct LockInfo {
    /// The lock record name (e.g. "jx-lock-staging").
    pub name: String,

    /// The namespace the lock protects.
    pub namespace: String,

    /// Pipeline holding the lock, from the record labels.
    pub owner: String,
    pub repository: String,
    pub branch: String,
    pub build: String,

    /// Build registered as next in line, when one is waiting.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,

    /// Pod owning the lock (pod-tracked mode).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod: Option<String>,

    /// Expiry of the lock (expiry mode).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,

    /// Human-readable age of the current claim.
    pub age: String,

    /// Whether the holder is gone and the next claimant will remove the lock.
    pub is_stale: bool,
}

impl LockInfo {
    pub(super) fn new(record: &LockRecord, is_stale: bool) -> Self {
        let label = |key: &str| record.labels.get(key).cloned().unwrap_or_default();
        let build = label("build");

        // the data section moves on to the waiting build once one registers
        let data = &record.data;
        let next = if data.owner != label("owner")
            || data.repository != label("repository")
            || data.branch != label("branch")
            || data.build != build
        {
            Some(format!(
                "{}/{}/{} #{}",
                data.owner, data.repository, data.branch, data.build
            ))
        } else {
            None
        };

        Self {
            name: record.name.clone(),
            namespace: label("namespace"),
            owner: label("owner"),
            repository: label("repository"),
            branch: label("branch"),
            build,
            next,
            pod: record.owners.first().map(|o| o.name.clone()),
            expires: record.annotations.get(super::record::EXPIRES_KEY).cloned(),
            age: record.age_string(),
            is_stale,
        }
    }
}

impl std::fmt::Display for LockInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (namespace: {}, held by: {}/{}/{} #{}, age: {}",
            self.name,
            self.namespace,
            self.owner,
            self.repository,
            self.branch,
            self.build,
            self.age
        )?;
        if let Some(pod) = &self.pod {
            write!(f, ", pod: {}", pod)?;
        }
        if let Some(expires) = &self.expires {
            write!(f, ", expires: {}", expires)?;
        }
        if let Some(next) = &self.next {
            write!(f, ", next: {}", next)?;
        }
        write!(f, "{})", if self.is_stale { ", STALE" } else { "" })
    }
}
