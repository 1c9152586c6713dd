//! Exponential reconnect backoff.

use std::time::Duration;

/// Reconnection policy for the session client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Attempts made after an abnormal close before giving up.
    pub max_attempts: usize,
    /// Delay before the first attempt.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl ReconnectPolicy {
    /// Delay to wait before reconnect attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: usize) -> Duration {
        compute_backoff_delay(attempt, self.base_delay, self.max_delay)
    }

    /// The full delay schedule for attempts `1..=max_attempts`.
    pub fn schedule(&self) -> Vec<Duration> {
        (1..=self.max_attempts).map(|n| self.delay_for(n)).collect()
    }
}

/// `min(base * 2^(attempt-1), max_delay)`.
pub fn compute_backoff_delay(attempt: usize, base: Duration, max_delay: Duration) -> Duration {
    let multiplier = 2u32.saturating_pow(attempt.saturating_sub(1) as u32) as f64;
    let scaled = base.as_secs_f64() * multiplier;
    Duration::from_secs_f64(scaled.min(max_delay.as_secs_f64()))
}
