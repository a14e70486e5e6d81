use std::time::Duration;
use tokio::time::sleep;

// ============================================================================
// Backoff Retry Strategy
// ============================================================================
//
// Retries an async operation with a bounded number of attempts. The delay
// starts at `initial_delay` and is multiplied after every failure, capped at
// `max_delay`. A multiplier of 1.0 gives a fixed backoff.
//
// ============================================================================

#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound for any delay
    pub max_delay: Duration,
    /// Growth factor applied to the delay after each failure
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Same delay between every attempt
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
        }
    }

    /// Few quick retries for best-effort side channels
    pub fn conservative() -> Self {
        Self {
            max_attempts: 2,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        let grown = Duration::from_millis(((delay.as_millis() as f64) * self.multiplier) as u64);
        grown.min(self.max_delay)
    }
}

/// Result of a retried operation, with the number of attempts it took
#[derive(Debug)]
pub enum RetryResult<T, E> {
    /// Operation succeeded
    Success { value: T, attempts: u32 },
    /// Operation kept failing until attempts ran out
    Failed { error: E, attempts: u32 },
    /// Operation hit an error that is not worth retrying
    PermanentFailure { error: E, attempts: u32 },
}

impl<T, E> RetryResult<T, E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryResult::Success { attempts, .. }
            | RetryResult::Failed { attempts, .. }
            | RetryResult::PermanentFailure { attempts, .. } => *attempts,
        }
    }

    pub fn into_result(self) -> Result<T, E> {
        match self {
            RetryResult::Success { value, .. } => Ok(value),
            RetryResult::Failed { error, .. } | RetryResult::PermanentFailure { error, .. } => Err(error),
        }
    }
}

/// Check if an error is transient (should retry) or permanent (should not retry)
pub trait IsTransient {
    fn is_transient(&self) -> bool;
}

/// Retry every error until attempts run out
pub async fn retry_with_backoff<F, Fut, T, E>(config: RetryConfig, operation: F) -> RetryResult<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_classified(config, operation, |_| true).await
}

/// Retry only errors that report themselves as transient
pub async fn retry_on_transient<F, Fut, T, E>(config: RetryConfig, operation: F) -> RetryResult<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display + IsTransient,
{
    retry_classified(config, operation, IsTransient::is_transient).await
}

async fn retry_classified<F, Fut, T, E, C>(
    config: RetryConfig,
    mut operation: F,
    is_transient: C,
) -> RetryResult<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    C: Fn(&E) -> bool,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(attempt = attempt, "Operation succeeded after retry");
                }
                return RetryResult::Success { value, attempts: attempt };
            }
            Err(error) if !is_transient(&error) => {
                tracing::debug!(error = %error, "Permanent failure, not retrying");
                return RetryResult::PermanentFailure { error, attempts: attempt };
            }
            Err(error) => {
                if attempt >= config.max_attempts {
                    tracing::warn!(
                        attempt = attempt,
                        error = %error,
                        "Operation failed after all retries"
                    );
                    return RetryResult::Failed { error, attempts: attempt };
                }

                tracing::debug!(
                    attempt = attempt,
                    error = %error,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying after delay"
                );

                sleep(delay).await;
                delay = config.next_delay(delay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    enum TestError {
        Busy,
        Gone,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    impl IsTransient for TestError {
        fn is_transient(&self) -> bool {
            matches!(self, TestError::Busy)
        }
    }

    fn quick(max_attempts: u32) -> RetryConfig {
        RetryConfig::fixed(max_attempts, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_retry_succeeds_eventually() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_with_backoff(quick(3), |_attempt| {
            let counter = counter_clone.clone();
            async move {
                let count = counter.fetch_add(1, Ordering::SeqCst);
                if count < 2 {
                    Err("temporary failure")
                } else {
                    Ok("success")
                }
            }
        })
        .await;

        assert!(matches!(result, RetryResult::Success { value: "success", attempts: 3 }));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_fails_after_max_attempts() {
        let result = retry_with_backoff(quick(2), |_attempt| async {
            Err::<(), _>("persistent failure")
        })
        .await;

        assert!(matches!(result, RetryResult::Failed { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn test_permanent_error_stops_immediately() {
        let result = retry_on_transient(quick(5), |_attempt| async { Err::<(), _>(TestError::Gone) }).await;

        assert!(matches!(result, RetryResult::PermanentFailure { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn test_transient_error_is_retried() {
        let result = retry_on_transient(quick(4), |attempt| async move {
            if attempt < 4 {
                Err(TestError::Busy)
            } else {
                Ok(attempt)
            }
        })
        .await;

        assert_eq!(result.attempts(), 4);
        assert_eq!(result.into_result().unwrap(), 4);
    }

    #[test]
    fn test_fixed_config_never_grows() {
        let config = RetryConfig::fixed(3, Duration::from_millis(100));
        assert_eq!(config.next_delay(Duration::from_millis(100)), Duration::from_millis(100));

        let growing = RetryConfig::default();
        assert_eq!(growing.next_delay(Duration::from_millis(100)), Duration::from_millis(200));
    }
}
