//! Error types for buildlock.
//!
//! Uses thiserror for derive macros. Protocol signals from the lock store
//! (`AlreadyExists`, `NotFound`, `Conflict`) never reach this type while a
//! lock is being acquired; they are absorbed by the acquisition loop.

use crate::exit_codes;
use crate::store::StoreError;
use thiserror::Error;

/// Main error type for buildlock operations.
#[derive(Error, Debug)]
pub enum BuildLockError {
    /// Build identity or claimant pod could not be determined, or the
    /// configuration is invalid.
    #[error("invalid build configuration: {0}")]
    Configuration(String),

    /// A build with higher or equal priority holds or waits for the lock.
    #[error("lock is claimed by a build with priority: {0}")]
    Priority(String),

    /// Unexpected failure from the lock store, or a malformed lock record.
    #[error("lock store failure: {0}")]
    Store(String),

    /// The command wrapped by `buildlock run` failed.
    #[error("command failed: {0}")]
    Command(String),
}

impl BuildLockError {
    /// Returns the appropriate exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            BuildLockError::Configuration(_) => exit_codes::CONFIGURATION_ERROR,
            BuildLockError::Priority(_) => exit_codes::PRIORITY_FAILURE,
            BuildLockError::Store(_) => exit_codes::STORE_FAILURE,
            BuildLockError::Command(_) => exit_codes::COMMAND_FAILURE,
        }
    }
}

impl From<StoreError> for BuildLockError {
    fn from(err: StoreError) -> Self {
        BuildLockError::Store(err.to_string())
    }
}

/// Result type alias for buildlock operations.
pub type Result<T> = std::result::Result<T, BuildLockError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_has_correct_exit_code() {
        let err = BuildLockError::Configuration("no REPO_OWNER provided".to_string());
        assert_eq!(err.exit_code(), exit_codes::CONFIGURATION_ERROR);
    }

    #[test]
    fn test_priority_error_has_correct_exit_code() {
        let err = BuildLockError::Priority("newer build 12 is waiting already".to_string());
        assert_eq!(err.exit_code(), exit_codes::PRIORITY_FAILURE);
    }

    #[test]
    fn test_store_error_has_correct_exit_code() {
        let err = BuildLockError::Store("connection refused".to_string());
        assert_eq!(err.exit_code(), exit_codes::STORE_FAILURE);
    }

    #[test]
    fn test_command_error_has_correct_exit_code() {
        let err = BuildLockError::Command("exit status 2".to_string());
        assert_eq!(err.exit_code(), exit_codes::COMMAND_FAILURE);
    }

    #[test]
    fn test_store_errors_convert_to_store_failures() {
        let err: BuildLockError = StoreError::Api("forbidden".to_string()).into();
        assert!(matches!(err, BuildLockError::Store(_)));
        assert!(err.to_string().contains("forbidden"));
    }

    #[test]
    fn test_error_messages_are_descriptive() {
        let err = BuildLockError::Priority("newer build 12 is waiting already".to_string());
        assert_eq!(
            err.to_string(),
            "lock is claimed by a build with priority: newer build 12 is waiting already"
        );
    }
}
