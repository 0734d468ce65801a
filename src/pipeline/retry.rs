use std::future::Future;
use std::time::Duration;
use tracing::warn;

use super::RateLimiter;
use crate::github::ApiError;

/// Capped retry for rate-limited upstream calls.
///
/// Only [`ApiError::RateLimited`] is retried; every other error is
/// terminal for the attempt. After `max_attempts` the last rate-limit
/// error is returned so the caller can record it.
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
            base_delay: Duration::from_millis(4000),
            max_delay: Duration::from_secs(900),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Delay before retry number `attempt` (1-based). A server hint wins
    /// over the exponential schedule; both are capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let computed = || {
            let exponent = attempt.saturating_sub(1).min(16);
            self.base_delay.saturating_mul(1 << exponent)
        };
        hint.unwrap_or_else(computed).min(self.max_delay)
    }

    /// Runs `op` through `limiter`, retrying rate-limited attempts.
    ///
    /// Backoff is applied to the shared limiter, so while one call waits
    /// out a rate limit every other worker waits too.
    pub async fn run<T, F, Fut>(&self, limiter: &RateLimiter, label: &str, mut op: F) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut attempt = 1;
        loop {
            limiter.acquire().await;
            match op().await {
                Err(ApiError::RateLimited { retry_after, message }) if attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt, retry_after);
                    warn!(
                        call = label,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        %message,
                        "rate limited, backing off"
                    );
                    limiter.pause_for(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(5), Duration::from_millis(50))
    }

    fn limited(hint: Option<Duration>) -> ApiError {
        ApiError::RateLimited {
            retry_after: hint,
            message: "HTTP 429".into(),
        }
    }

    #[test]
    fn test_delay_schedule() {
        let policy = RetryPolicy::new(5, Duration::from_secs(4), Duration::from_secs(30));
        assert_eq!(policy.delay_for(1, None), Duration::from_secs(4));
        assert_eq!(policy.delay_for(2, None), Duration::from_secs(8));
        assert_eq!(policy.delay_for(3, None), Duration::from_secs(16));
        assert_eq!(policy.delay_for(4, None), Duration::from_secs(30));
        assert_eq!(policy.delay_for(1, Some(Duration::from_secs(2))), Duration::from_secs(2));
        assert_eq!(policy.delay_for(1, Some(Duration::from_secs(600))), Duration::from_secs(30));
    }

    #[test]
    fn test_zero_attempts_still_tries_once() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO, Duration::ZERO).max_attempts, 1);
    }

    #[tokio::test]
    async fn test_succeeds_after_rate_limit() {
        let calls = AtomicU32::new(0);
        let limiter = RateLimiter::unlimited();

        let result = quick()
            .run(&limiter, "stats", || async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(limited(None))
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let limiter = RateLimiter::unlimited();

        let result: Result<(), ApiError> = quick()
            .run(&limiter, "sbom", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(limited(Some(Duration::from_millis(1))))
            })
            .await;

        assert!(result.unwrap_err().is_rate_limited());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_other_errors_are_terminal() {
        let calls = AtomicU32::new(0);
        let limiter = RateLimiter::unlimited();

        let result: Result<(), ApiError> = quick()
            .run(&limiter, "codeql", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ApiError::NotFound)
            })
            .await;

        assert_eq!(result, Err(ApiError::NotFound));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
