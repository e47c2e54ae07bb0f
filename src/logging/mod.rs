//! Logging setup and log sanitization.

pub mod sanitize;

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;

static LOGGING: OnceCell<()> = OnceCell::new();

/// Initialize the tracing subscriber. Idempotent: later calls are no-ops.
///
/// Respects `RUST_LOG`; defaults to `info` for the engine and `warn` for
/// dependencies when unset.
pub fn init_logging() {
    LOGGING.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("warn,adbroker=info"));

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    });
}
