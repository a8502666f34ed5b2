use std::time::Duration;

use crate::error::DownloadError;

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Give up; the task transitions to Failed.
    NoRetry,
    /// Retry after the given delay.
    RetryAfter(Duration),
}

/// Fixed-delay policy: up to `max_retries` retries per failure episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first failure of an episode.
    pub max_retries: u32,
    /// Delay between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// `retry` is 1-based: the number of the retry that would run next.
    pub fn decide(&self, retry: u32, err: &DownloadError) -> RetryDecision {
        if !err.is_transient() || retry > self.max_retries {
            return RetryDecision::NoRetry;
        }
        RetryDecision::RetryAfter(self.delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reset() -> DownloadError {
        DownloadError::Stream("connection reset".into())
    }

    #[test]
    fn no_retry_for_protocol_errors() {
        let p = RetryPolicy::default();
        assert_eq!(
            p.decide(1, &DownloadError::Protocol { code: 404 }),
            RetryDecision::NoRetry
        );
        assert_eq!(p.decide(1, &DownloadError::Cancelled), RetryDecision::NoRetry);
    }

    #[test]
    fn fixed_delay_between_attempts() {
        let p = RetryPolicy::default();
        assert_eq!(
            p.decide(1, &reset()),
            RetryDecision::RetryAfter(Duration::from_secs(2))
        );
        assert_eq!(
            p.decide(3, &reset()),
            RetryDecision::RetryAfter(Duration::from_secs(2))
        );
    }

    #[test]
    fn respects_max_retries() {
        let p = RetryPolicy {
            max_retries: 2,
            delay: Duration::from_millis(10),
        };
        assert!(matches!(p.decide(1, &reset()), RetryDecision::RetryAfter(_)));
        assert!(matches!(p.decide(2, &reset()), RetryDecision::RetryAfter(_)));
        assert_eq!(p.decide(3, &reset()), RetryDecision::NoRetry);
    }
}
