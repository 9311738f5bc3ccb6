//! CLI argument parsing for buildlock.
//!
//! Uses clap derive macros for declarative argument definitions.
//! This module defines the command structure; actual implementations
//! are in the `commands` module.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Buildlock: serialize pipeline deployments to a Kubernetes namespace.
///
/// A pipeline takes the build lock of its target namespace before deploying:
/// - One build deploys to a namespace at a time
/// - Newer builds of the same branch overtake older ones waiting in line
/// - Locks held by finished pods or past their expiry are reclaimed
#[derive(Parser, Debug)]
#[command(name = "buildlock")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Log debug details of the lock protocol.
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Config file (YAML). Defaults apply when omitted.
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands for buildlock.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a command while holding the build lock of a namespace.
    ///
    /// Reads the build identity from REPO_OWNER, REPO_NAME, BRANCH_NAME and
    /// BUILD_NUMBER. Waits while another build holds the lock, and fails when
    /// a build with priority holds or waits for it.
    Run(RunArgs),

    /// Lock management commands.
    ///
    /// List or clear build locks.
    Lock(LockCommand),
}

/// Arguments for the `run` command.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Namespace the command deploys to.
    #[arg(long, short)]
    pub namespace: String,

    /// Command to run, and its arguments.
    #[arg(last = true, required = true, num_args = 1..)]
    pub command: Vec<String>,
}

/// Lock subcommands.
#[derive(Parser, Debug)]
pub struct LockCommand {
    #[command(subcommand)]
    pub action: LockAction,
}

/// Available lock actions.
#[derive(Subcommand, Debug)]
pub enum LockAction {
    /// List all build locks.
    ///
    /// Shows the build holding each lock, the build next in line, and whether
    /// the lock is stale.
    List(LockListArgs),

    /// Clear the build lock of a namespace.
    ///
    /// Requires --force flag to prevent accidental clearing.
    Clear(LockClearArgs),
}

/// Arguments for the `lock list` command.
#[derive(Parser, Debug)]
pub struct LockListArgs {
    /// Print the locks as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `lock clear` command.
#[derive(Parser, Debug)]
pub struct LockClearArgs {
    /// Namespace whose lock should be cleared.
    pub namespace: String,

    /// Force clearing the lock (required for safety).
    #[arg(long)]
    pub force: bool,
}

impl Cli {
    /// Parse command line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_debug_assert() {
        // Verifies the CLI arguments configuration is valid
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "buildlock",
            "run",
            "--namespace",
            "staging",
            "--",
            "helm",
            "upgrade",
            "--install",
        ])
        .unwrap();
        assert!(!cli.verbose);
        if let Command::Run(args) = cli.command {
            assert_eq!(args.namespace, "staging");
            assert_eq!(args.command, vec!["helm", "upgrade", "--install"]);
        } else {
            panic!("Expected Run command");
        }
    }

    #[test]
    fn test_parse_run_requires_command() {
        let result = Cli::try_parse_from(["buildlock", "run", "--namespace", "staging"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_global_flags() {
        let cli = Cli::try_parse_from([
            "buildlock",
            "lock",
            "list",
            "--verbose",
            "--config",
            "buildlock.yaml",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("buildlock.yaml")));
    }

    #[test]
    fn test_parse_lock_list() {
        let cli = Cli::try_parse_from(["buildlock", "lock", "list", "--json"]).unwrap();
        if let Command::Lock(lock_cmd) = cli.command {
            assert!(matches!(lock_cmd.action, LockAction::List(LockListArgs { json: true })));
        } else {
            panic!("Expected Lock command");
        }
    }

    #[test]
    fn test_parse_lock_clear() {
        let cli = Cli::try_parse_from(["buildlock", "lock", "clear", "staging", "--force"]).unwrap();
        if let Command::Lock(lock_cmd) = cli.command {
            if let LockAction::Clear(args) = lock_cmd.action {
                assert_eq!(args.namespace, "staging");
                assert!(args.force);
            } else {
                panic!("Expected Clear action");
            }
        } else {
            panic!("Expected Lock command");
        }
    }
}
