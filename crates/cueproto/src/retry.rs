//! Retry policy for OSC requests.
//!
//! QLab over UDP gives no delivery guarantee, so a request that sees no
//! reply within its timeout is re-sent with a fresh correlation id:
//! - Retrying requests on timeout
//! - Backing off between attempts, capped
//! - Counting exhausted requests towards a disconnect threshold

use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Timeout per request attempt
    pub timeout: Duration,
    /// Retries after the first attempt times out
    pub max_retries: u32,
    /// Initial backoff between retries
    pub backoff_base: Duration,
    /// Maximum backoff between retries (caps exponential growth)
    pub backoff_max: Duration,
    /// Consecutive exhausted requests before a connected peer counts as lost
    pub max_failures: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_retries: 0,
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_secs(2),
            max_failures: 2,
        }
    }
}

impl RetryConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_max_failures(mut self, max_failures: u32) -> Self {
        self.max_failures = max_failures;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Exponential backoff capped at backoff_max:
    /// attempt 1: backoff_base
    /// attempt n: min(backoff_base * 2^(n-1), backoff_max)
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let multiplier = 2u32.saturating_pow(attempt.saturating_sub(1));
        let delay = self.backoff_base.saturating_mul(multiplier);
        std::cmp::min(delay, self.backoff_max)
    }
}

/// Outcome of a single request attempt, before retry logic.
#[derive(Debug)]
pub enum AttemptResult<T> {
    Success(T),
    /// No reply before the deadline (may retry)
    Timeout,
    /// The transport refused the message (may retry)
    SendFailed(String),
}
