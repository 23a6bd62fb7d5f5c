//! Structured logging initialization.

use crate::error::{TelemetryError, TelemetryResult};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter directive when `RUST_LOG` is unset.
///
/// Targets match by prefix, so `sockrx` covers every workspace crate.
pub fn default_filter(debug_mode: bool) -> &'static str {
    if debug_mode {
        "info,sockrx=debug"
    } else {
        "info,sockrx=info"
    }
}

/// Initialize structured logging.
///
/// JSON output when `RUST_ENV=production`, pretty output otherwise. Logs go
/// to stderr; stdout is left to the event stream. `debug_mode` lowers the
/// default level for this workspace's crates.
pub fn init_logging(debug_mode: bool) -> TelemetryResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(debug_mode)));

    let is_production = std::env::var("RUST_ENV")
        .map(|v| v == "production")
        .unwrap_or(false);

    let result = if is_production {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(true)
                    .with_span_list(true),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .pretty()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    };

    result.map_err(|e| TelemetryError::LoggingInit(e.to_string()))
}
