//! Bounded retry policy shared by submission, transport and polling loops.

use std::time::Duration;

/// Statuses that signal a validation/consistency race on the server.
pub const TRANSIENT_CONFLICT_STATUSES: &[u16] = &[409, 422];

/// Statuses the transport layer retries.
pub const SERVER_ERROR_STATUSES: &[u16] = &[500, 502, 503, 504];

/// How many times to try, how long to wait, and which statuses qualify.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Growth factor between consecutive delays; 1.0 keeps them fixed.
    pub backoff_multiplier: f64,
    /// Response statuses that may be retried.
    pub retry_statuses: Vec<u16>,
}

impl RetryPolicy {
    /// 409/422, five attempts, one second apart.
    pub fn transient_conflicts() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 1.0,
            retry_statuses: TRANSIENT_CONFLICT_STATUSES.to_vec(),
        }
    }

    /// Gateway/server errors, three attempts with doubling delays.
    pub fn server_errors() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            retry_statuses: SERVER_ERROR_STATUSES.to_vec(),
        }
    }

    /// Fixed delay, no status filter.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
            retry_statuses: Vec::new(),
        }
    }

    /// Single attempt.
    pub fn no_retry() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets both the initial delay and, if smaller, the cap.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        if self.max_delay < delay || self.backoff_multiplier <= 1.0 {
            self.max_delay = delay;
        }
        self
    }

    #[must_use]
    pub fn with_statuses(mut self, statuses: &[u16]) -> Self {
        self.retry_statuses = statuses.to_vec();
        self
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exp = attempt.saturating_sub(1).min(31) as i32;
        if exp == 0 || self.backoff_multiplier == 1.0 {
            return self.initial_delay.min(self.max_delay);
        }
        let factor = self.backoff_multiplier.powi(exp);
        let cap = self.max_delay.as_secs_f64();
        if self.initial_delay.as_secs_f64() * factor >= cap {
            return self.max_delay;
        }
        self.initial_delay.mul_f64(factor)
    }

    pub fn is_retryable(&self, status: u16) -> bool {
        self.retry_statuses.contains(&status)
    }

    /// True when `status` qualifies and attempt `attempt` (1-based) was not the last.
    pub fn should_retry(&self, attempt: u32, status: u16) -> bool {
        self.is_retryable(status) && self.has_attempts_left(attempt)
    }

    pub fn has_attempts_left(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::transient_conflicts()
    }
}
