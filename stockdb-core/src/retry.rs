//! Bounded retry with a fixed interval between attempts.
//!
//! ```text
//! attempt 1 --(Err)--> sleep(interval) --> attempt 2 --(Err)--> ... --> attempt N --(Err)--> give up
//!     \                                        \                            \
//!     (Ok) -> return                           (Ok) -> return               (Ok) -> return
//! ```
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

/// How often and how far apart an operation is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// total number of attempts, including the first one
    max_attempts: u16,
    interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(5))
    }
}

/// Returned when every attempt failed. Carries the error of the last attempt.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u16,
    pub last_error: E,
}

impl RetryPolicy {
    /// `max_attempts` of zero is treated as a single attempt.
    pub fn new(max_attempts: u16, interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
        }
    }

    pub fn max_attempts(&self) -> u16 {
        self.max_attempts
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Runs `operation` until it succeeds or the attempts are used up. The operation receives the
    /// 1-based attempt number.
    pub async fn retry<T, E, F, Fut>(&self, mut operation: F) -> Result<T, Exhausted<E>>
    where
        F: FnMut(u16) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= self.max_attempts => {
                    tracing::error!(
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "Giving up after the last attempt"
                    );
                    return Err(Exhausted {
                        attempts: attempt,
                        last_error: e,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        retry_in_ms = self.interval.as_millis(),
                        error = %e,
                        "Attempt failed, retrying"
                    );
                    sleep(self.interval).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU16, Ordering};

    use super::*;

    type Attempt = std::future::Ready<Result<u16, String>>;

    fn failing_until(succeed_on: u16) -> (Arc<AtomicU16>, impl FnMut(u16) -> Attempt) {
        let calls = Arc::new(AtomicU16::new(0));
        let counter = Arc::clone(&calls);
        let op = move |attempt: u16| {
            counter.fetch_add(1, Ordering::SeqCst);
            if attempt >= succeed_on {
                std::future::ready(Ok(attempt))
            } else {
                std::future::ready(Err(format!("attempt {attempt} failed")))
            }
        };
        (calls, op)
    }

    #[tokio::test]
    async fn test_succeeds_on_last_attempt() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1));
        let (calls, op) = failing_until(5);

        let result = policy.retry(op).await;
        assert_eq!(result.unwrap(), 5);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_exhausted() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1));
        let (calls, op) = failing_until(u16::MAX);

        let err = policy.retry(op).await.unwrap_err();
        assert_eq!(err.attempts, 5);
        assert_eq!(err.last_error, "attempt 5 failed");
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_first_attempt_success_does_not_sleep() {
        let policy = RetryPolicy::new(3, Duration::from_secs(3600));
        let (calls, op) = failing_until(1);

        let result = tokio::time::timeout(Duration::from_secs(1), policy.retry(op)).await;
        assert_eq!(result.unwrap().unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_interval_between_attempts() {
        let policy = RetryPolicy::default();
        let (_, op) = failing_until(3);

        let start = tokio::time::Instant::now();
        policy.retry(op).await.unwrap();
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(10) && elapsed < Duration::from_secs(11));
    }

    #[test]
    fn test_zero_attempts_means_one() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts(), 1);
    }
}
