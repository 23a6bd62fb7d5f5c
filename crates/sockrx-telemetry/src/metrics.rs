//! Prometheus metrics for socket-receiver.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. A registration failure
//! means duplicate metric names, which is a programming error that should
//! surface on first use rather than be silently ignored.

use crate::error::{TelemetryError, TelemetryResult};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_int_counter, CounterVec, Encoder, GaugeVec,
    IntCounter, TextEncoder,
};

const STATES: [&str; 4] = ["disconnected", "connecting", "auth_pending", "ready"];

/// Connection state machine current state.
/// Labels: state (disconnected/connecting/auth_pending/ready)
pub static WS_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "sockrx_ws_state",
        "Socket state machine current state (1=active, 0=inactive)",
        &["state"]
    )
    .unwrap()
});

/// Total forced reconnects.
/// Labels: reason (ack_timeout/dead_transport)
pub static WS_RECONNECT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sockrx_ws_reconnect_total",
        "Total forced socket reconnects",
        &["reason"]
    )
    .unwrap()
});

/// Total socket closes.
/// Labels: kind (normal/unexpected), clean (true/false)
pub static WS_CLOSE_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sockrx_ws_close_total",
        "Total socket closes",
        &["kind", "clean"]
    )
    .unwrap()
});

/// Total transport errors.
pub static WS_ERROR_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("sockrx_ws_error_total", "Total socket error callbacks").unwrap()
});

/// Total events forwarded to the publisher.
/// Labels: kind
pub static EVENTS_FORWARDED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sockrx_events_forwarded_total",
        "Total decoded events forwarded",
        &["kind"]
    )
    .unwrap()
});

/// Total decode failures.
/// Labels: stage (frame/nested)
pub static DECODE_FAILED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sockrx_decode_failed_total",
        "Total frame decode failures",
        &["stage"]
    )
    .unwrap()
});

/// Total settings reloads.
pub static SETTINGS_RELOAD_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("sockrx_settings_reload_total", "Total settings reloads").unwrap()
});

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    /// Set the state machine state.
    /// Only the active state is set to 1, all others to 0.
    pub fn ws_state_set(state: &str) {
        for s in STATES {
            WS_STATE.with_label_values(&[s]).set(0.0);
        }
        WS_STATE.with_label_values(&[state]).set(1.0);
    }

    /// Record a forced reconnect.
    pub fn ws_reconnect(reason: &str) {
        WS_RECONNECT_TOTAL.with_label_values(&[reason]).inc();
    }

    /// Record a socket close.
    pub fn ws_close(code: u16, clean: bool) {
        let kind = if matches!(code, 1000 | 1005) {
            "normal"
        } else {
            "unexpected"
        };
        let clean = if clean { "true" } else { "false" };
        WS_CLOSE_TOTAL.with_label_values(&[kind, clean]).inc();
    }

    /// Record a transport error callback.
    pub fn ws_error() {
        WS_ERROR_TOTAL.inc();
    }

    /// Record an event forwarded to the publisher.
    pub fn event_forwarded(kind: &str) {
        EVENTS_FORWARDED_TOTAL.with_label_values(&[kind]).inc();
    }

    /// Record a decode failure.
    pub fn decode_failed(stage: &str) {
        DECODE_FAILED_TOTAL.with_label_values(&[stage]).inc();
    }

    /// Record a settings reload.
    pub fn settings_reloaded() {
        SETTINGS_RELOAD_TOTAL.inc();
    }

    /// Render all registered metrics in the text exposition format.
    pub fn gather_text() -> TelemetryResult<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|_| TelemetryError::MetricsEncoding)
    }
}
