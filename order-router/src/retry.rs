//! Retry policy applied by the dispatcher

use http::StatusCode;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::upstream::client::AttemptError;

/// Default attempts per request, counting the first one
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay for exponential backoff (100ms)
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);

/// Default maximum delay between attempts (2s)
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(2);

/// Default hard limit on a single attempt (10s)
const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Which attempt failures are retried on another instance
#[derive(Clone)]
pub enum RetryOn {
    /// Connection errors, timeouts, 502/503/504
    Transient,
    /// Caller-supplied predicate
    Custom(Arc<dyn Fn(&AttemptError) -> bool + Send + Sync>),
}

impl fmt::Debug for RetryOn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryOn::Transient => write!(f, "Transient"),
            RetryOn::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Whether a failure is worth another instance
pub fn is_transient(error: &AttemptError) -> bool {
    match error {
        AttemptError::Connect(_) | AttemptError::Timeout | AttemptError::Transport(_) => true,
        AttemptError::Status(status) => matches!(
            *status,
            StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
        ),
        AttemptError::InvalidRequest(_) => false,
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts per request, counting the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Growth factor between consecutive retries
    pub multiplier: u32,
    /// Cap on the delay between attempts
    pub max_delay: Duration,
    /// Hard limit on a single attempt
    pub attempt_timeout: Duration,
    pub retry_on: RetryOn,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            multiplier: 2,
            max_delay: DEFAULT_MAX_DELAY,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            retry_on: RetryOn::Transient,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    pub fn with_backoff(
        mut self,
        base_delay: Duration,
        multiplier: u32,
        max_delay: Duration,
    ) -> Self {
        self.base_delay = base_delay;
        self.multiplier = multiplier.max(1);
        self.max_delay = max_delay;
        self
    }

    pub fn with_attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    pub fn with_predicate(
        mut self,
        predicate: impl Fn(&AttemptError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.retry_on = RetryOn::Custom(Arc::new(predicate));
        self
    }

    /// Check if a failed attempt should be retried elsewhere
    pub fn should_retry(&self, error: &AttemptError) -> bool {
        match &self.retry_on {
            RetryOn::Transient => is_transient(error),
            RetryOn::Custom(predicate) => predicate(error),
        }
    }

    /// Whether an upstream response status counts as a failed attempt
    pub fn is_retryable_status(&self, status: StatusCode) -> bool {
        self.should_retry(&AttemptError::Status(status))
    }

    /// Delay before retry number `retry` (0 = first retry)
    pub fn calculate_delay(&self, retry: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(retry.min(16));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(is_transient(&AttemptError::Timeout));
        assert!(is_transient(&AttemptError::Connect("refused".into())));
        assert!(is_transient(&AttemptError::Status(StatusCode::BAD_GATEWAY)));
        assert!(is_transient(&AttemptError::Status(StatusCode::GATEWAY_TIMEOUT)));

        assert!(!is_transient(&AttemptError::Status(StatusCode::UNAUTHORIZED)));
        assert!(!is_transient(&AttemptError::Status(StatusCode::TOO_MANY_REQUESTS)));
        assert!(!is_transient(&AttemptError::Status(StatusCode::INTERNAL_SERVER_ERROR)));
        assert!(!is_transient(&AttemptError::InvalidRequest("bad uri".into())));
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let policy = RetryPolicy::default().with_backoff(
            Duration::from_millis(100),
            2,
            Duration::from_millis(500),
        );
        assert_eq!(policy.calculate_delay(0), Duration::from_millis(100));
        assert_eq!(policy.calculate_delay(1), Duration::from_millis(200));
        assert_eq!(policy.calculate_delay(2), Duration::from_millis(400));
        assert_eq!(policy.calculate_delay(3), Duration::from_millis(500));
        assert_eq!(policy.calculate_delay(40), Duration::from_millis(500));
    }

    #[test]
    fn test_custom_predicate() {
        let policy = RetryPolicy::new(5).with_predicate(|e| matches!(e, AttemptError::Timeout));
        assert!(policy.should_retry(&AttemptError::Timeout));
        assert!(!policy.should_retry(&AttemptError::Connect("refused".into())));
        assert!(!policy.is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
    }

    #[test]
    fn test_at_least_one_attempt() {
        assert_eq!(RetryPolicy::new(0).max_attempts, 1);
    }
}
