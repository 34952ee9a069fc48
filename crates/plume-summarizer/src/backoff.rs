use std::time::Duration;

/// Retry budget for one logical call: `max_attempts` tries in total, waiting
/// `initial_delay * multiplier^i` after the i-th failed try.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_attempts: usize,
    pub initial_delay: Duration,
    pub multiplier: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            multiplier: 2,
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = self
            .multiplier
            .checked_pow(attempt_index as u32)
            .unwrap_or(u32::MAX);
        self.initial_delay.saturating_mul(factor)
    }

    /// Whether a failure on the zero-based `attempt_index` leaves another try.
    pub fn has_next(&self, attempt_index: usize) -> bool {
        attempt_index + 1 < self.max_attempts
    }

    /// Waits actually slept when every attempt fails; none after the last one.
    pub fn schedule(&self) -> Vec<Duration> {
        (0..self.max_attempts.saturating_sub(1))
            .map(|i| self.delay_for_attempt(i))
            .collect()
    }
}
