//! Lock record model.
//!
//! A lock record is a ConfigMap-shaped resource named `jx-lock-<namespace>`
//! in the coordination namespace. Its labels identify the build holding the
//! lock; its data identifies the build holding the lock or, once a newer
//! build registered itself, the build waiting next in line.

use super::types::Holder;
use crate::error::{BuildLockError, Result};
use crate::identity::ClaimantDescriptor;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use std::collections::BTreeMap;

/// Prefix of every lock record name.
pub const LOCK_NAME_PREFIX: &str = "jx-lock-";

/// Label marking a resource as a build lock. Anything without it is not ours.
pub const KIND_LABEL: &str = "jenkins-x.io/kind";

/// Value of [`KIND_LABEL`] on build locks.
pub const KIND_VALUE: &str = "build-lock";

/// Annotation (and data key) holding the expiry of locks no pod tracks.
pub const EXPIRES_KEY: &str = "expires";

/// Kind of the only supported ownership link target.
pub const POD_KIND: &str = "Pod";

const CREATED_BY_ANNOTATION: &str = "jenkins-x.io/created-by";
const CREATED_BY_VALUE: &str = "Jenkins X";

/// Name of the lock record protecting `namespace`.
pub fn lock_name(namespace: &str) -> String {
    format!("{}{}", LOCK_NAME_PREFIX, namespace)
}

/// Format a time the way lock records store it (RFC3339, UTC).
pub fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse an RFC3339 time read from a lock record.
pub(crate) fn parse_time(value: &str, what: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            BuildLockError::Store(format!("cannot parse the lock's {} '{}': {}", what, value, e))
        })
}

/// Structural reference from a lock record to the pod owning it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerLink {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: String,
}

/// The data section of a lock record.
///
/// Values stay textual: a record written by another tool may hold anything,
/// and parsing failures surface only when a value is actually compared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockData {
    pub namespace: String,
    pub owner: String,
    pub repository: String,
    pub branch: String,
    pub build: String,
    pub pod: Option<String>,
    pub timestamp: String,
    pub expires: Option<String>,
}

impl LockData {
    /// Read the data section. Missing keys read as empty.
    pub fn from_map(map: &BTreeMap<String, String>) -> Self {
        let text = |key: &str| map.get(key).cloned().unwrap_or_default();
        let optional = |key: &str| map.get(key).filter(|v| !v.is_empty()).cloned();

        Self {
            namespace: text("namespace"),
            owner: text("owner"),
            repository: text("repository"),
            branch: text("branch"),
            build: text("build"),
            pod: optional("pod"),
            timestamp: text("timestamp"),
            expires: optional(EXPIRES_KEY),
        }
    }

    /// Write the data section.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::from([
            ("namespace".to_string(), self.namespace.clone()),
            ("owner".to_string(), self.owner.clone()),
            ("repository".to_string(), self.repository.clone()),
            ("branch".to_string(), self.branch.clone()),
            ("build".to_string(), self.build.clone()),
            ("timestamp".to_string(), self.timestamp.clone()),
        ]);
        if let Some(pod) = &self.pod {
            map.insert("pod".to_string(), pod.clone());
        }
        if let Some(expires) = &self.expires {
            map.insert(EXPIRES_KEY.to_string(), expires.clone());
        }
        map
    }

    /// Whether both describe builds of the same owner/repository/branch.
    pub fn same_pipeline(&self, other: &LockData) -> bool {
        self.owner == other.owner
            && self.repository == other.repository
            && self.branch == other.branch
    }
}

/// A persisted lock record.
#[derive(Debug, Clone, PartialEq)]
pub struct LockRecord {
    /// Resource name, `jx-lock-<namespace>`.
    pub name: String,

    /// Unique id assigned by the store on creation.
    pub uid: Option<String>,

    /// Version assigned by the store on every write.
    pub resource_version: Option<String>,

    pub labels: BTreeMap<String, String>,

    pub annotations: BTreeMap<String, String>,

    /// Ownership links. A valid lock has none (expiry mode) or one pod.
    pub owners: Vec<OwnerLink>,

    pub data: LockData,
}

impl LockRecord {
    /// Build the record a claimant tries to create.
    ///
    /// Locks without an owning pod get no expiry here; see [`LockRecord::refresh_expiry`].
    pub fn for_claimant(claimant: &ClaimantDescriptor) -> Self {
        let identity = &claimant.identity;
        let build = identity.build.to_string();

        let labels = BTreeMap::from([
            ("namespace".to_string(), claimant.namespace.clone()),
            ("owner".to_string(), identity.owner.clone()),
            ("repository".to_string(), identity.repository.clone()),
            ("branch".to_string(), identity.branch.clone()),
            ("build".to_string(), build.clone()),
            (KIND_LABEL.to_string(), KIND_VALUE.to_string()),
        ]);

        let annotations = BTreeMap::from([
            (CREATED_BY_ANNOTATION.to_string(), CREATED_BY_VALUE.to_string()),
            ("warning".to_string(), "DO NOT REMOVE".to_string()),
            (
                "purpose".to_string(),
                format!(
                    "This is a deployment lock for the namespace \"{}\". It prevents several \
                     deployments to edit the same namespace at the same time. It will \
                     automatically be removed once the deployment is finished, or replaced by \
                     the next deployment to run.",
                    claimant.namespace
                ),
            ),
        ]);

        let data = LockData {
            namespace: claimant.namespace.clone(),
            owner: identity.owner.clone(),
            repository: identity.repository.clone(),
            branch: identity.branch.clone(),
            build,
            pod: claimant.pod.as_ref().map(|p| p.name.clone()),
            timestamp: format_time(claimant.timestamp),
            expires: None,
        };

        Self {
            name: lock_name(&claimant.namespace),
            uid: None,
            resource_version: None,
            labels,
            annotations,
            owners: claimant.pod.iter().cloned().collect(),
            data,
        }
    }

    /// Push the expiry of a lock no pod tracks to `now + ttl`.
    /// Locks owned by a pod are left untouched.
    pub fn refresh_expiry(&mut self, now: DateTime<Utc>, ttl: Duration) {
        if !self.owners.is_empty() {
            return;
        }
        let expires = format_time(now + ttl);
        self.annotations
            .insert(EXPIRES_KEY.to_string(), expires.clone());
        self.data.expires = Some(expires);
    }

    /// Whether the record carries the build-lock kind label.
    pub fn has_kind_label(&self) -> bool {
        self.labels.get(KIND_LABEL).map(String::as_str) == Some(KIND_VALUE)
    }

    /// The namespace this record claims to protect, from its labels.
    pub fn target_namespace(&self) -> Option<&str> {
        self.labels.get("namespace").map(String::as_str)
    }

    /// The UID of a stored record.
    pub fn stored_uid(&self) -> Result<&str> {
        self.uid.as_deref().ok_or_else(|| {
            BuildLockError::Store(format!("the lock {} has no uid", self.name))
        })
    }

    /// What keeps this lock alive: its owning pod or its expiry.
    pub fn holder(&self) -> Result<Holder<'_>> {
        match self.owners.as_slice() {
            [] => {
                let expires = self.annotations.get(EXPIRES_KEY).map(String::as_str);
                let expires = parse_time(expires.unwrap_or_default(), "expires annotation")?;
                Ok(Holder::Expiry(expires))
            }
            [owner] if owner.kind == POD_KIND && !owner.name.is_empty() => Ok(Holder::Pod(owner)),
            [owner] => Err(BuildLockError::Store(format!(
                "the lock {} has invalid owner reference {} {}",
                self.name, owner.kind, owner.name
            ))),
            owners => Err(BuildLockError::Store(format!(
                "the lock {} has {} owner references",
                self.name,
                owners.len()
            ))),
        }
    }

    /// Time since the claim in the data section was made, if readable.
    pub fn age(&self) -> Option<Duration> {
        parse_time(&self.data.timestamp, "timestamp")
            .ok()
            .map(|t| Utc::now().signed_duration_since(t))
    }

    /// Format the age as a human-readable string.
    pub fn age_string(&self) -> String {
        let Some(age) = self.age() else {
            return "unknown".to_string();
        };
        let minutes = age.num_minutes();
        let hours = age.num_hours();
        let days = age.num_days();

        if days > 0 {
            format!("{}d {}h", days, hours % 24)
        } else if hours > 0 {
            format!("{}h {}m", hours, minutes % 60)
        } else {
            format!("{}m", minutes.max(0))
        }
    }
}
