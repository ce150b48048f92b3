use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, warn};

pub mod fetch_queue;
pub mod shutdown;

pub use fetch_queue::{FetchQueue, QueueError};
pub use shutdown::{shutdown_channel, Shutdown, ShutdownTrigger};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total number of attempts, including the initial one
    pub max_attempts: u32,
    /// Delay after the first failure; doubled after each further failure
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Backoff after the failed attempt with 0-based index `attempt`: `base * 2^attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

/// Retry an async operation with exponential backoff.
///
/// Every error is retried the same way; there is no classification of
/// permanent vs transient failures. After `max_attempts` failures the last
/// error is returned unmodified.
///
/// # Example
/// ```ignore
/// let balance = retry_with_backoff(|| async { rpc.get_balance(&address).await }, &RetryConfig::default()).await?;
/// ```
pub async fn retry_with_backoff<F, Fut, T, E>(operation: F, config: &RetryConfig) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_with_backoff_while(operation, config, |_| true).await
}

/// Like [`retry_with_backoff`], but an error for which `retryable` returns
/// false is returned at once, without sleeping.
pub async fn retry_with_backoff_while<F, Fut, T, E, P>(
    mut operation: F,
    config: &RetryConfig,
    retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!("Operation succeeded after {} retry attempts", attempt);
                }
                return Ok(result);
            }
            Err(e) => {
                if !retryable(&e) {
                    debug!("Operation failed with a non-retryable error: {}", e);
                    return Err(e);
                }
                if attempt + 1 >= max_attempts {
                    error!(
                        "Operation failed after {} attempts (max retries exhausted): {}",
                        attempt + 1,
                        e
                    );
                    return Err(e);
                }

                let delay = config.delay_for(attempt);
                warn!(
                    "Operation failed (attempt {}/{}): {} - retrying in {}ms",
                    attempt + 1,
                    max_attempts,
                    e,
                    delay.as_millis()
                );

                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    #[derive(Debug, PartialEq)]
    struct TestError {
        attempt: u32,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "TestError on attempt {}", self.attempt)
        }
    }

    /// Fails the first `failures` calls, then returns 42.
    fn flaky(failures: u32) -> (Arc<AtomicU32>, impl FnMut() -> std::future::Ready<Result<i32, TestError>>) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let op = move || {
            let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= failures {
                std::future::ready(Err(TestError { attempt }))
            } else {
                std::future::ready(Ok(42))
            }
        };
        (calls, op)
    }

    #[test]
    fn test_delay_schedule_doubles() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for(0), Duration::from_secs(1));
        assert_eq!(config.delay_for(1), Duration::from_secs(2));
        assert_eq!(config.delay_for(2), Duration::from_secs(4));
        // shift overflow saturates instead of panicking
        assert_eq!(config.delay_for(40), Duration::from_secs(u32::MAX as u64));
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_success() {
        let (calls, op) = flaky(0);
        let start = Instant::now();
        let result = retry_with_backoff(op, &RetryConfig::default()).await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_success_sleeps_k_delays() {
        let (calls, op) = flaky(2);
        let start = Instant::now();
        let result = retry_with_backoff(op, &RetryConfig::default()).await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s after the first failure, 2s after the second
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(3), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(4), "elapsed {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_return_last_error() {
        let (calls, op) = flaky(u32::MAX);
        let result = retry_with_backoff(op, &RetryConfig::default()).await;

        assert_eq!(result, Err(TestError { attempt: 3 }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_returns_without_backoff() {
        let (calls, op) = flaky(u32::MAX);
        let start = Instant::now();
        let result = retry_with_backoff_while(op, &RetryConfig::default(), |e: &TestError| e.attempt != 1).await;

        assert_eq!(result, Err(TestError { attempt: 1 }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_attempt_never_sleeps() {
        let (calls, op) = flaky(u32::MAX);
        let start = Instant::now();
        let result = retry_with_backoff(op, &RetryConfig::new(1, Duration::from_secs(5))).await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
