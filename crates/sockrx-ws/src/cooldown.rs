//! Reconnect cooldown.
//!
//! A single fixed-window limiter shared by every reconnect trigger, so a
//! flapping connection cannot produce a retry storm.

use std::time::{Duration, Instant};
use tracing::debug;

/// Default minimum interval between reconnect attempts.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(10);

/// Fixed-window cooldown timer.
#[derive(Debug, Clone)]
pub struct CooldownTimer {
    /// Minimum interval between attempts.
    window: Duration,
    /// When the last attempt was issued.
    last_attempt: Option<Instant>,
}

impl CooldownTimer {
    /// Create a cooldown timer with the given window.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_attempt: None,
        }
    }

    /// Time of the last recorded attempt.
    pub fn last_attempt(&self) -> Option<Instant> {
        self.last_attempt
    }

    /// Check whether the window is still running at `now`.
    pub fn is_active_at(&self, now: Instant) -> bool {
        self.last_attempt
            .is_some_and(|t| now.saturating_duration_since(t) < self.window)
    }

    /// Time left until the window expires.
    pub fn remaining_at(&self, now: Instant) -> Duration {
        match self.last_attempt {
            Some(t) => self.window.saturating_sub(now.saturating_duration_since(t)),
            None => Duration::ZERO,
        }
    }

    /// Record a reconnect attempt, restarting the window.
    pub fn reset_at(&mut self, now: Instant) {
        self.last_attempt = Some(now);
        debug!(window_ms = self.window.as_millis() as u64, "Cooldown started");
    }
}

impl Default for CooldownTimer {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}
