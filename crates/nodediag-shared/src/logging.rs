//! Tracing bootstrap for the agent binary and tests.

use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LogFormat;

/// Initialize the global subscriber. `RUST_LOG` wins over the default
/// `info` filter. Safe to call more than once; later calls are no-ops.
pub fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = fmt().with_env_filter(filter).with_target(true);
    let result = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.try_init(),
    };
    // Re-initialization in tests is expected; ignore it.
    let _ = result;
}
