//! Logging bootstrap

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize logging based on log level
///
/// `RUST_LOG` wins over `level` when it is set. Calling this more than once is
/// harmless: later calls leave the first subscriber in place and return false.
pub fn init_logging(level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init()
        .is_ok()
}
