//! Build identity of the claimant.
//!
//! A pipeline run is identified by the owner, repository, branch and build
//! number its environment provides. Unless the pipeline is interpreted
//! locally, the run also has exactly one pod carrying these labels; the lock
//! is then bound to that pod's lifetime.

use crate::error::{BuildLockError, Result};
use crate::locks::OwnerLink;
use crate::store::{LockStore, PodInfo};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::{debug, warn};

pub const REPO_OWNER_ENV: &str = "REPO_OWNER";
pub const REPO_NAME_ENV: &str = "REPO_NAME";
pub const BRANCH_NAME_ENV: &str = "BRANCH_NAME";
pub const BUILD_NUMBER_ENV: &str = "BUILD_NUMBER";
pub const INTERPRET_PIPELINE_ENV: &str = "JX_INTERPRET_PIPELINE";

/// Label carried by pipeline pods next to the identity labels.
pub const PIPELINE_TYPE_LABEL: &str = "jenkins.io/pipelineType";
pub const PIPELINE_TYPE_BUILD: &str = "build";

/// Owner, repository, branch and build number of a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildIdentity {
    pub owner: String,
    pub repository: String,
    pub branch: String,
    pub build: i64,
}

impl BuildIdentity {
    /// Read the identity from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the identity through `lookup`. Empty values count as missing.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key).filter(|v| !v.is_empty()).ok_or_else(|| {
                warn!("no {} provided", key);
                BuildLockError::Configuration(format!("no {} provided", key))
            })
        };

        let owner = required(REPO_OWNER_ENV)?;
        let repository = required(REPO_NAME_ENV)?;
        let branch = required(BRANCH_NAME_ENV)?;
        let build = required(BUILD_NUMBER_ENV)?;
        let build = build.trim().parse().map_err(|e| {
            warn!("invalid {} '{}': {}", BUILD_NUMBER_ENV, build, e);
            BuildLockError::Configuration(format!(
                "invalid {} '{}': {}",
                BUILD_NUMBER_ENV, build, e
            ))
        })?;

        Ok(Self {
            owner,
            repository,
            branch,
            build,
        })
    }

    /// Labels selecting the pod of this pipeline run.
    pub fn pod_selector(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("owner".to_string(), self.owner.clone()),
            ("repository".to_string(), self.repository.clone()),
            ("branch".to_string(), self.branch.clone()),
            ("build".to_string(), self.build.to_string()),
            (
                PIPELINE_TYPE_LABEL.to_string(),
                PIPELINE_TYPE_BUILD.to_string(),
            ),
        ])
    }
}

impl std::fmt::Display for BuildIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{} #{}",
            self.owner, self.repository, self.branch, self.build
        )
    }
}

/// Whether the pipeline is interpreted locally (no pod tracks it).
pub fn interpret_mode_from_env() -> bool {
    interpret_mode(|key| std::env::var(key).ok())
}

/// Whether `lookup` reports an interpreted pipeline.
pub fn interpret_mode<F>(lookup: F) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(INTERPRET_PIPELINE_ENV).as_deref() == Some("true")
}

/// The claimant of a lock: who asks, for which namespace, since when.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimantDescriptor {
    /// The target namespace to protect.
    pub namespace: String,

    pub identity: BuildIdentity,

    /// The pod running this build, unless the pipeline is interpreted.
    pub pod: Option<OwnerLink>,

    /// When this claim was made.
    pub timestamp: DateTime<Utc>,
}

impl ClaimantDescriptor {
    /// A claimant no pod tracks; its lock is bound to an expiry.
    pub fn interpreted(namespace: &str, identity: BuildIdentity) -> Self {
        Self {
            namespace: namespace.to_string(),
            identity,
            pod: None,
            timestamp: Utc::now(),
        }
    }

    /// A claimant whose lock is bound to the lifetime of `pod`.
    pub fn with_pod(namespace: &str, identity: BuildIdentity, pod: &PodInfo) -> Self {
        // API clients may leave type information out of listed items
        let api_version = if pod.api_version.is_empty() {
            "v1".to_string()
        } else {
            pod.api_version.clone()
        };
        let kind = if pod.kind.is_empty() {
            crate::locks::POD_KIND.to_string()
        } else {
            pod.kind.clone()
        };

        Self {
            namespace: namespace.to_string(),
            identity,
            pod: Some(OwnerLink {
                api_version,
                kind,
                name: pod.name.clone(),
                uid: pod.uid.clone(),
            }),
            timestamp: Utc::now(),
        }
    }
}

/// Build the claimant descriptor of this pipeline run.
///
/// Unless `interpret` is set, exactly one pod must match the identity labels;
/// none or several is a configuration error.
pub async fn describe_claimant(
    store: &dyn LockStore,
    namespace: &str,
    identity: BuildIdentity,
    interpret: bool,
) -> Result<ClaimantDescriptor> {
    if interpret {
        debug!("interpreted pipeline {}, no pod to track", identity);
        return Ok(ClaimantDescriptor::interpreted(namespace, identity));
    }

    let selector = identity.pod_selector();
    let pods = store.find_pods(&selector).await?;
    match pods.as_slice() {
        [pod] => {
            debug!("pipeline {} runs in pod {}", identity, pod.name);
            Ok(ClaimantDescriptor::with_pod(namespace, identity, pod))
        }
        _ => {
            let selector = selector
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(",");
            warn!("{} pods found for this job ({})", pods.len(), selector);
            Err(BuildLockError::Configuration(format!(
                "{} pods found for this job ({})",
                pods.len(),
                selector
            )))
        }
    }
}
