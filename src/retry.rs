//! Retry policy with bounded exponential backoff.
//!
//! The policy is pure data: it answers "how many attempts" and "how long to
//! wait before attempt N". Which errors are worth retrying is decided by the
//! caller ([`Error::is_retryable`] at the query executor,
//! auth-versus-transient classification at the pool), so the curve can be
//! tested without any I/O.
//!
//! [`Error::is_retryable`]: crate::Error::is_retryable

use std::time::Duration;

/// Bounded exponential backoff: `base_delay * 2^(attempt-1)`, capped at
/// `max_delay`, for at most `max_attempts` attempts.
///
/// Defaults: 3 attempts, 100 ms base, 5 s cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self { max_attempts, base_delay, max_delay }
    }

    /// A policy that gives up after the first failure.
    pub fn no_retry() -> Self {
        Self { max_attempts: 1, ..Self::default() }
    }

    /// Delay to sleep before retry number `attempt` (the first retry is
    /// attempt 1). Doubles per attempt, saturating at `max_delay`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}
