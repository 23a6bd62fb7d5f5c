//! Prometheus metrics and structured logging for socket-receiver.
//!
//! - Structured logging with tracing (pretty for development, JSON for production)
//! - Prometheus counters for connection state, reconnects and event flow

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{default_filter, init_logging};
pub use metrics::Metrics;
