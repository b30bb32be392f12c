//! Retry logic for transient errors
//!
//! Provides configurable retry policies for database round-trips that fail
//! transiently, e.g. a briefly unreachable server during a migration run.

use super::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Trait for errors that can be retried
pub trait RetryableError {
    /// Check if the error is retryable
    fn is_retryable(&self) -> bool;
}

impl RetryableError for Error {
    fn is_retryable(&self) -> bool {
        self.is_retryable()
    }
}

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,
    /// Initial delay between attempts
    pub initial_delay: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
    /// Backoff multiplier (e.g. 2.0 for exponential backoff)
    pub backoff_multiplier: f32,
    /// Add random jitter to delays
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with fixed delay
    pub fn fixed(attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: attempts,
            initial_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    /// Create a policy with exponential backoff
    pub fn exponential(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    /// Single re-invocation on transient failure, no delay growth
    pub fn once_more() -> Self {
        Self::fixed(2, Duration::from_millis(250))
    }

    /// Calculate delay for a given attempt
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let mut delay = self.initial_delay;

        if self.backoff_multiplier > 1.0 {
            let multiplier = self.backoff_multiplier.powi(attempt as i32 - 1);
            delay = Duration::from_secs_f32(delay.as_secs_f32() * multiplier);
        }

        if delay > self.max_delay {
            delay = self.max_delay;
        }

        if self.jitter {
            use rand::Rng;
            let mut rng = rand::thread_rng();
            let jitter_factor = rng.gen_range(0.5..1.5);
            delay = Duration::from_secs_f32(delay.as_secs_f32() * jitter_factor);
        }

        delay
    }
}

/// Execute an async operation with retry logic
///
/// Only errors classified retryable by [`RetryableError`] are retried; all
/// others propagate immediately.
pub async fn with_retry<F, Fut, T>(policy: RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = None;

    for attempt in 1..=policy.max_attempts {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(error) => {
                if !error.is_retryable() || attempt == policy.max_attempts {
                    return Err(error);
                }

                let delay = policy.calculate_delay(attempt);

                log::warn!(
                    "Retry attempt {}/{} after {:?} for error: {}",
                    attempt,
                    policy.max_attempts,
                    delay,
                    error
                );

                last_error = Some(error);
                sleep(delay).await;
            }
        }
    }

    Err(last_error.unwrap_or_else(|| Error::internal("Retry failed with no error")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_delay_calculation() {
        let mut policy = RetryPolicy::exponential(3);
        policy.jitter = false;

        let delay1 = policy.calculate_delay(1);
        let delay2 = policy.calculate_delay(2);
        let delay3 = policy.calculate_delay(3);

        assert!(delay1.as_millis() >= 99 && delay1.as_millis() <= 101);
        assert!(delay2.as_millis() >= 199 && delay2.as_millis() <= 201);
        assert!(delay3.as_millis() >= 399 && delay3.as_millis() <= 401);
    }

    #[tokio::test]
    async fn test_retry_with_success() {
        let attempt = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let attempt_clone = attempt.clone();
        let policy = RetryPolicy::fixed(3, Duration::from_millis(10));

        let result = with_retry(policy, || {
            let attempt_inner = attempt_clone.clone();
            async move {
                let count = attempt_inner.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                if count < 1 {
                    Err(Error::database_connection("Temporary failure"))
                } else {
                    Ok("Success")
                }
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(result.unwrap(), "Success");
        assert_eq!(attempt.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_with_non_retryable_error() {
        let attempt = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let attempt_clone = attempt.clone();
        let policy = RetryPolicy::fixed(3, Duration::from_millis(10));

        let result: Result<()> = with_retry(policy, || {
            let attempt_inner = attempt_clone.clone();
            async move {
                attempt_inner.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Err(Error::validation("Invalid input"))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempt.load(std::sync::atomic::Ordering::SeqCst), 1); // Should not retry
    }

    #[tokio::test]
    async fn test_once_more_retries_exactly_once() {
        let attempt = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let attempt_clone = attempt.clone();

        let result: Result<()> = with_retry(RetryPolicy::once_more(), || {
            let attempt_inner = attempt_clone.clone();
            async move {
                attempt_inner.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Err(Error::timeout("still down"))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempt.load(std::sync::atomic::Ordering::SeqCst), 2);
    }
}
