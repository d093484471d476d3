//! Retry policy: decides backoff delays between failed receives.

use std::time::Duration;

/// Exponential backoff for consecutive transport failures in the consumer.
///
/// Only consulted when the error policy keeps the loop alive; under `Halt`
/// the first failure ends the loop.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay after the first failure.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before the next poll after `failures` consecutive failures (1-indexed).
    ///
    /// delay = base_delay * multiplier^(failures - 1), capped at `max_delay`.
    /// `failures == 0` yields `Duration::ZERO`.
    pub fn next_delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let base_secs = self.base_delay.as_secs_f64();
        let exponent = failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_secs = base_secs * self.multiplier.powi(exponent);
        if !delay_secs.is_finite() || delay_secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(delay_secs)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
        }
    }
}
