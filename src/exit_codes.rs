//! Exit code constants for the buildlock CLI.
//!
//! - 0: Success
//! - 1: Configuration error (missing build identity, ambiguous pod, bad config)
//! - 2: Priority failure (a newer build holds or waits for the lock)
//! - 3: Lock store failure (Kubernetes API error, malformed lock record)
//! - 4: Wrapped command failure (`buildlock run`)

/// Successful execution.
pub const SUCCESS: i32 = 0;

/// Configuration error: build identity, claimant pod or config file is invalid.
pub const CONFIGURATION_ERROR: i32 = 1;

/// Priority failure: another build has precedence over this one.
pub const PRIORITY_FAILURE: i32 = 2;

/// Lock store failure: the state of the lock is unknown.
pub const STORE_FAILURE: i32 = 3;

/// The command run under the lock failed.
pub const COMMAND_FAILURE: i32 = 4;
