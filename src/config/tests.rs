//! Tests for config functionality.

use crate::config::{Config, validate_namespace};
use crate::error::BuildLockError;
use chrono::Duration;
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_default_config() {
    let config = Config::default();

    assert_eq!(config.coordination_namespace, "jx");
    assert_eq!(config.lock_ttl_minutes, 60);
    assert_eq!(config.pipeline_controller, "tekton-pipelines-controller");
    assert!(config.require_pipeline_controller);
    assert_eq!(config.lock_ttl(), Duration::hours(1));
}

#[test]
fn test_parse_minimal_yaml() {
    let config = Config::from_yaml("require_pipeline_controller: true\n").unwrap();

    // Should use all defaults
    assert_eq!(config.coordination_namespace, "jx");
    assert_eq!(config.lock_ttl_minutes, 60);
}

#[test]
fn test_parse_partial_yaml() {
    let yaml = r#"
coordination_namespace: cd
lock_ttl_minutes: 15
"#;
    let config = Config::from_yaml(yaml).unwrap();

    assert_eq!(config.coordination_namespace, "cd");
    assert_eq!(config.lock_ttl_minutes, 15);

    // Unspecified values should use defaults
    assert_eq!(config.pipeline_controller, "tekton-pipelines-controller");
    assert!(config.require_pipeline_controller);
}

#[test]
fn test_parse_yaml_with_unknown_fields() {
    let yaml = r#"
lock_ttl_minutes: 5
unknown_field: "some value"
another_unknown:
  nested: true
"#;
    let config = Config::from_yaml(yaml).unwrap();
    assert_eq!(config.lock_ttl_minutes, 5);
}

#[test]
fn test_validate_zero_ttl_fails() {
    let result = Config::from_yaml("lock_ttl_minutes: 0");

    let err = result.unwrap_err();
    assert!(matches!(err, BuildLockError::Configuration(_)));
    assert!(err.to_string().contains("lock_ttl_minutes"));
}

#[test]
fn test_validate_bad_coordination_namespace_fails() {
    let result = Config::from_yaml("coordination_namespace: Not_A_Namespace");

    let err = result.unwrap_err();
    assert!(err.to_string().contains("coordination_namespace"));
}

#[test]
fn test_validate_empty_controller_only_when_required() {
    let yaml = r#"
pipeline_controller: ""
"#;
    assert!(Config::from_yaml(yaml).is_err());

    let yaml = r#"
pipeline_controller: ""
require_pipeline_controller: false
"#;
    assert!(Config::from_yaml(yaml).is_ok());
}

#[test]
fn test_invalid_yaml_is_configuration_error() {
    let result = Config::from_yaml("lock_ttl_minutes: [1, 2");
    assert!(matches!(result, Err(BuildLockError::Configuration(_))));
}

#[test]
fn test_yaml_round_trip_keeps_values() {
    let config = Config {
        coordination_namespace: "pipelines".to_string(),
        lock_ttl_minutes: 30,
        pipeline_controller: "my-controller".to_string(),
        require_pipeline_controller: false,
    };

    let parsed = Config::from_yaml(&config.to_yaml().unwrap()).unwrap();
    assert_eq!(parsed.coordination_namespace, "pipelines");
    assert_eq!(parsed.lock_ttl_minutes, 30);
    assert_eq!(parsed.pipeline_controller, "my-controller");
    assert!(!parsed.require_pipeline_controller);
}

#[test]
fn test_load_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "coordination_namespace: ci").unwrap();

    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.coordination_namespace, "ci");
}

#[test]
fn test_load_missing_file_fails() {
    let result = Config::load("/nonexistent/buildlock.yaml");

    let err = result.unwrap_err();
    assert!(err.to_string().contains("failed to read config file"));
}

#[test]
fn test_validate_namespace() {
    assert!(validate_namespace("my-namespace", "target namespace").is_ok());
    assert!(validate_namespace("jx-staging", "target namespace").is_ok());
    assert!(validate_namespace("a1", "target namespace").is_ok());

    assert!(validate_namespace("", "target namespace").is_err());
    assert!(validate_namespace("-leading", "target namespace").is_err());
    assert!(validate_namespace("trailing-", "target namespace").is_err());
    assert!(validate_namespace("UPPER", "target namespace").is_err());
    assert!(validate_namespace("has.dot", "target namespace").is_err());
    assert!(validate_namespace(&"a".repeat(64), "target namespace").is_err());

    let err = validate_namespace("Bad", "target namespace").unwrap_err();
    assert!(err.to_string().contains("target namespace 'Bad'"));
}
