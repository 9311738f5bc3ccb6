//! Configuration defaults and name validation helpers.

use crate::error::{BuildLockError, Result};
use regex::Regex;
use std::sync::LazyLock;

/// Kubernetes DNS-1123 label: what a namespace name may look like.
static DNS_LABEL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").ok());

/// Maximum length of a DNS-1123 label.
const DNS_LABEL_MAX_LEN: usize = 63;

/// Check that `namespace` is a valid Kubernetes namespace name.
///
/// The `what` argument names the value in the error message
/// (e.g. "target namespace").
pub fn validate_namespace(namespace: &str, what: &str) -> Result<()> {
    let valid = namespace.len() <= DNS_LABEL_MAX_LEN
        && DNS_LABEL
            .as_ref()
            .is_some_and(|re| re.is_match(namespace));

    if valid {
        Ok(())
    } else {
        Err(BuildLockError::Configuration(format!(
            "{} '{}' is not a valid namespace name",
            what, namespace
        )))
    }
}

// Default value functions for serde
pub(crate) fn default_coordination_namespace() -> String {
    "jx".to_string()
}
pub(crate) fn default_lock_ttl_minutes() -> u32 {
    60
}
pub(crate) fn default_pipeline_controller() -> String {
    "tekton-pipelines-controller".to_string()
}
pub(crate) fn default_true() -> bool {
    true
}
