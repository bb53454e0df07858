//! Minimum spacing between connection attempts.

use std::time::Duration;
use tokio::time::Instant;

/// Backoff timer for reconnect attempts
///
/// Starts out eligible. Each recorded attempt blocks the next one until
/// `min_interval` has elapsed; `reset` makes it eligible immediately again.
#[derive(Debug, Clone)]
pub struct BackoffTimer {
    last_attempt: Option<Instant>,
    min_interval: Duration,
}

impl BackoffTimer {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            last_attempt: None,
            min_interval,
        }
    }

    pub fn last_attempt(&self) -> Option<Instant> {
        self.last_attempt
    }

    /// Time left before a new attempt is allowed at `now`
    pub fn remaining(&self, now: Instant) -> Duration {
        match self.last_attempt {
            Some(last) => self
                .min_interval
                .saturating_sub(now.saturating_duration_since(last)),
            None => Duration::ZERO,
        }
    }

    pub fn permits(&self, now: Instant) -> bool {
        self.remaining(now).is_zero()
    }

    pub fn record_attempt(&mut self, now: Instant) {
        self.last_attempt = Some(now);
    }

    pub fn reset(&mut self) {
        self.last_attempt = None;
    }
}
