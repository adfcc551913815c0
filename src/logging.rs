//! Diagnostic logging.
//!
//! User-facing progress goes to stderr via `eprintln!`; this subscriber carries
//! the structured diagnostics emitted with `tracing` macros.

use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter, e.g. `TOOLBOX_LOG=toolbox=debug`.
pub const LOG_ENV: &str = "TOOLBOX_LOG";

const DEFAULT_FILTER: &str = "warn";

/// Install the global subscriber. `verbose` raises the default level to `debug`.
///
/// Safe to call more than once; later calls are ignored.
pub fn init(verbose: bool) {
    let default = if verbose { "debug" } else { DEFAULT_FILTER };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
