//! Reconnect backoff policy

use std::time::Duration;

/// Exponential backoff with a cap and a bounded attempt budget.
///
/// The delay doubles after each use up to `max_delay`; a successful open
/// resets both the delay and the attempt counter.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    attempt: u32,
    delay: Duration,
    base_delay: Duration,
    max_delay: Duration,
    max_attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            attempt: 0,
            delay: base_delay,
            base_delay,
            max_delay,
            max_attempts,
        }
    }

    /// Delay to wait before the next reconnect attempt, or `None` when the
    /// attempt budget is exhausted. Increments the attempt counter.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        self.attempt += 1;
        let delay = self.delay;
        self.delay = (self.delay * 2).min(self.max_delay);
        Some(delay)
    }

    /// Reset after a successful open.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.delay = self.base_delay;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(1000), Duration::from_millis(30_000), 5)
    }
}
