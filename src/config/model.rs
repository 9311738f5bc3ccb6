//! Config struct definition and default implementation.

use super::types::*;
use serde::{Deserialize, Serialize};

/// Configuration for the build lock.
///
/// Unknown fields in the YAML are ignored for forward compatibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Namespace holding the lock records and the pipeline pods (default: "jx").
    #[serde(default = "default_coordination_namespace")]
    pub coordination_namespace: String,

    /// Lifetime of a lock that no pod tracks (interpreted pipelines).
    #[serde(default = "default_lock_ttl_minutes")]
    pub lock_ttl_minutes: u32,

    /// Deployment of the pipeline controller. When it is not installed,
    /// pipelines do not run in pods and locking is skipped.
    #[serde(default = "default_pipeline_controller")]
    pub pipeline_controller: String,

    /// Whether to look for the pipeline controller before locking.
    #[serde(default = "default_true")]
    pub require_pipeline_controller: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            coordination_namespace: default_coordination_namespace(),
            lock_ttl_minutes: default_lock_ttl_minutes(),
            pipeline_controller: default_pipeline_controller(),
            require_pipeline_controller: default_true(),
        }
    }
}
