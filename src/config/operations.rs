//! Config loading, validation, and utility operations.

use super::model::Config;
use super::types::validate_namespace;
use crate::error::{BuildLockError, Result};
use chrono::Duration;
use std::path::Path;

impl Config {
    /// Load config from a YAML file.
    ///
    /// Unknown fields in the YAML are silently ignored for forward compatibility.
    ///
    /// # Returns
    ///
    /// * `Ok(Config)` - Successfully loaded and validated config
    /// * `Err(BuildLockError::Configuration)` - Read/parse error or validation failure
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path).map_err(|e| {
            BuildLockError::Configuration(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        Self::from_yaml(&content)
    }

    /// Parse config from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml).map_err(|e| {
            BuildLockError::Configuration(format!("failed to parse config YAML: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize config to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| {
            BuildLockError::Configuration(format!("failed to serialize config to YAML: {}", e))
        })
    }

    /// Validate config values and return error on invalid values.
    ///
    /// Validation rules:
    /// - `lock_ttl_minutes` must be positive
    /// - `coordination_namespace` must be a valid namespace name
    /// - `pipeline_controller` must be set when the controller is required
    pub fn validate(&self) -> Result<()> {
        if self.lock_ttl_minutes == 0 {
            return Err(BuildLockError::Configuration(
                "config validation failed: lock_ttl_minutes must be greater than 0".to_string(),
            ));
        }

        validate_namespace(&self.coordination_namespace, "coordination_namespace")?;

        if self.require_pipeline_controller && self.pipeline_controller.trim().is_empty() {
            return Err(BuildLockError::Configuration(
                "config validation failed: pipeline_controller must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Lifetime of an expiry-mode lock.
    pub fn lock_ttl(&self) -> Duration {
        Duration::minutes(i64::from(self.lock_ttl_minutes))
    }
}
