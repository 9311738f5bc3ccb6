//! Command implementations for buildlock.
//!
//! This module provides the dispatcher that routes CLI commands to their
//! implementations. Commands work against any [`LockStore`]; the dispatcher
//! connects to the Kubernetes API.

mod lock;
mod run;

use crate::cli::{Command, LockAction, LockCommand};
use crate::config::Config;
use crate::error::Result;
use crate::store::{KubeLockStore, LockStore};
use std::path::Path;
use std::sync::Arc;

pub use lock::{cmd_lock_clear, cmd_lock_list, render_locks};
pub use run::cmd_run;

/// Load the config file, or the defaults when none is given.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path),
        None => Ok(Config::default()),
    }
}

/// Dispatch a command to its implementation.
pub async fn dispatch(command: Command, config: &Config) -> Result<()> {
    let store: Arc<dyn LockStore> =
        Arc::new(KubeLockStore::connect(&config.coordination_namespace).await?);
    dispatch_with(store, command, config).await
}

/// Dispatch a command against `store`.
pub async fn dispatch_with(
    store: Arc<dyn LockStore>,
    command: Command,
    config: &Config,
) -> Result<()> {
    match command {
        Command::Run(args) => cmd_run(store, config, args).await,
        Command::Lock(lock_cmd) => dispatch_lock(store.as_ref(), lock_cmd).await,
    }
}

/// Dispatch lock subcommands.
async fn dispatch_lock(store: &dyn LockStore, lock_cmd: LockCommand) -> Result<()> {
    match lock_cmd.action {
        LockAction::List(args) => cmd_lock_list(store, args).await,
        LockAction::Clear(args) => cmd_lock_clear(store, args).await,
    }
}
