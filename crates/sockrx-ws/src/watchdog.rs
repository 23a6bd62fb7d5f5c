//! Liveness watchdog.
//!
//! Tracks handshake progress separately from transport liveness so that a
//! socket that is open but never acknowledged is not confused with a dropped
//! one.

use std::time::{Duration, Instant};
use tracing::debug;

/// Default time allowed between a connect attempt and EVENT_CONNECTED.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Watchdog for the current connection attempt.
#[derive(Debug, Clone)]
pub struct LivenessWatchdog {
    /// How long an attempt may go without acknowledgement.
    ack_timeout: Duration,
    /// When the current attempt was issued.
    attempt_started: Option<Instant>,
    /// When the acknowledgement arrived for the current attempt.
    acknowledged_at: Option<Instant>,
    /// Last inbound frame on the current attempt.
    last_frame: Option<Instant>,
}

impl LivenessWatchdog {
    pub fn new(ack_timeout: Duration) -> Self {
        Self {
            ack_timeout,
            attempt_started: None,
            acknowledged_at: None,
            last_frame: None,
        }
    }

    /// Start watching a new connection attempt.
    pub fn arm_at(&mut self, now: Instant) {
        self.attempt_started = Some(now);
        self.acknowledged_at = None;
        self.last_frame = None;
    }

    /// Stop watching (connection discarded).
    pub fn disarm(&mut self) {
        self.attempt_started = None;
        self.acknowledged_at = None;
        self.last_frame = None;
    }

    /// Record the acknowledgement for the current attempt.
    pub fn acknowledge_at(&mut self, now: Instant) {
        self.acknowledged_at = Some(now);
        if let Some(started) = self.attempt_started {
            let ack_ms = now.saturating_duration_since(started).as_millis() as u64;
            debug!(ack_ms, "Handshake acknowledged");
        }
    }

    /// Record any inbound frame.
    pub fn record_frame_at(&mut self, now: Instant) {
        self.last_frame = Some(now);
    }

    /// An attempt is stalled when it is still waiting for acknowledgement
    /// after the timeout has elapsed.
    pub fn is_stalled_at(&self, now: Instant, awaiting_ack: bool) -> bool {
        if !awaiting_ack || self.acknowledged_at.is_some() {
            return false;
        }
        match self.attempt_started {
            Some(started) => now.saturating_duration_since(started) >= self.ack_timeout,
            None => true,
        }
    }

    /// Age of the current attempt.
    pub fn attempt_age_at(&self, now: Instant) -> Option<Duration> {
        self.attempt_started.map(|t| now.saturating_duration_since(t))
    }

    /// Time since the last inbound frame.
    pub fn since_last_frame_at(&self, now: Instant) -> Option<Duration> {
        self.last_frame.map(|t| now.saturating_duration_since(t))
    }
}

impl Default for LivenessWatchdog {
    fn default() -> Self {
        Self::new(DEFAULT_ACK_TIMEOUT)
    }
}
