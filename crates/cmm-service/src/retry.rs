//! Bounded exponential back-off for retry-eligible target calls.

use std::time::{Duration, Instant};

use crate::config::RetryConfig;

/// Tracks back-off state for one operation's retries.
///
/// `next_wait` doubles the wait (capped at `max_wait`) and returns `None`
/// once either the attempt limit or the total time budget is used up.
pub struct ExponentialBackoff {
    max_wait: Duration,
    total_budget: Duration,
    max_attempts: u32,
    current_wait: Duration,
    start: Instant,
    attempts: u32,
}

impl ExponentialBackoff {
    pub fn new(init_wait: Duration, max_wait: Duration, total_budget: Duration, max_attempts: u32) -> Self {
        Self {
            max_wait,
            total_budget,
            max_attempts,
            current_wait: init_wait,
            start: Instant::now(),
            attempts: 0,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.init_wait,
            config.max_wait,
            config.total_time,
            config.max_attempts,
        )
    }

    pub fn next_wait(&mut self) -> Option<Duration> {
        // The first attempt is not a retry.
        if self.attempts + 1 >= self.max_attempts {
            return None;
        }
        let elapsed = self.start.elapsed();
        if elapsed >= self.total_budget {
            return None;
        }

        let wait = self.current_wait;
        self.current_wait = (self.current_wait * 2).min(self.max_wait);
        self.attempts += 1;

        let remaining = self.total_budget.saturating_sub(elapsed);
        Some(wait.min(remaining))
    }

    /// Retries taken so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
