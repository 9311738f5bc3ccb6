//! Buildlock: serialize pipeline deployments to a Kubernetes namespace.
//!
//! This is the main entry point for the `buildlock` CLI. It parses arguments,
//! dispatches to the appropriate command handler, and handles errors with
//! proper exit codes.

use buildlock::cli::Cli;
use buildlock::{commands, exit_codes, logging};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();
    logging::init(cli.verbose);

    let result = match commands::load_config(cli.config.as_deref()) {
        Ok(config) => commands::dispatch(cli.command, &config).await,
        Err(err) => Err(err),
    };

    match result {
        Ok(()) => ExitCode::from(exit_codes::SUCCESS as u8),
        Err(err) => {
            // Print user-actionable error message to stderr
            eprintln!("Error: {}", err);

            // Return appropriate exit code
            ExitCode::from(err.exit_code() as u8)
        }
    }
}
