//! Tracing setup for the buildlock binary.

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Build the log filter: `RUST_LOG` directives on top of the default level.
///
/// The default level is INFO, or DEBUG with `verbose`.
pub fn filter(verbose: bool) -> EnvFilter {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    EnvFilter::from_default_env().add_directive(level.into())
}

/// Initialize the tracing subscriber, writing to stderr.
///
/// Stdout is left to command output. Initializing twice is a no-op.
pub fn init(verbose: bool) {
    // a subscriber may already be installed, e.g. by an embedding program
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(verbose))
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbose_raises_the_level() {
        assert!(filter(false).to_string().contains("info"));
        assert!(filter(true).to_string().contains("debug"));
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init(false);
        init(true);
    }
}
