//! Diagnostic logging.
//!
//! Internal events (spawn, wait, reap, descriptor remapping) go to stderr
//! through `tracing`. They are separate from the `debug N` trace, which is
//! part of the shell's own output.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Variable holding the filter directives.
pub const LOG_ENV: &str = "MYSH_LOG";

const DEFAULT_FILTER: &str = "mysh=warn";

fn filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Initialize the logging system.
///
/// # Panics
///
/// Panics if a global tracing subscriber has already been set.
pub fn init() {
    tracing_subscriber::registry()
        .with(filter())
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr),
        )
        .init();
}

/// Try to initialize the logging system.
///
/// Returns `Err` if logging has already been initialized.
pub fn try_init() -> Result<(), tracing_subscriber::util::TryInitError> {
    tracing_subscriber::registry()
        .with(filter())
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr),
        )
        .try_init()
}
