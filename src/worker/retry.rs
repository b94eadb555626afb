use std::time::Duration;

use crate::error::EngineError;

/// Decides whether an error is worth another provider attempt and how long
/// to back off before it.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Retryability follows error semantics, not source: transient network
    /// and server trouble can resolve on its own; rejections, missing
    /// sources, and cancellation cannot.
    pub fn is_retryable(&self, error: &EngineError) -> bool {
        matches!(error, EngineError::ProviderTransient(_))
    }

    /// Exponential backoff before attempt `attempt + 1`: base doubled per
    /// completed attempt, capped. Attempt 0 is the first failure, so the
    /// default schedule is 1s, 2s before the third and final attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        std::cmp::min(self.base_delay.saturating_mul(factor), self.max_delay)
    }
}
