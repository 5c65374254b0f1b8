//! Retry with exponential backoff
//!
//! Used by the wire clients for idempotent requests that fail for transient
//! (transport) reasons.
//!
//! **Algorithm:**
//! 1. Attempt operation
//! 2. If successful, return result
//! 3. If the error is retryable and attempts remain: log WARN, sleep, retry
//! 4. Otherwise return the last error together with the attempt count
//!
//! **Backoff Strategy:**
//! - Initial delay: `initial_delay` (100ms by default)
//! - Multiplier: `multiplier` (1.5 by default)

use std::future::Future;
use std::time::Duration;

/// How often and how patiently to retry an operation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one (at least 1)
    pub max_attempts: u32,
    /// Pause before the second attempt
    pub initial_delay: Duration,
    /// Growth factor applied to the pause after every retry
    pub multiplier: f64,
}

impl RetryPolicy {
    /// Exactly one attempt, for non-idempotent operations
    pub const fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            multiplier: 1.5,
        }
    }
}

/// Final error of a retried operation
#[derive(Debug)]
pub struct RetryFailure<E> {
    /// Number of attempts made
    pub attempts: u32,
    /// Error of the last attempt
    pub error: E,
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// `policy.max_attempts` is reached.
pub async fn retry_with_backoff<F, Fut, T, E>(
    operation_name: &str,
    policy: &RetryPolicy,
    is_retryable: impl Fn(&E) -> bool,
    mut operation: F,
) -> Result<T, RetryFailure<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut delay = policy.initial_delay;
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(error) => {
                if attempt >= max_attempts || !is_retryable(&error) {
                    return Err(RetryFailure {
                        attempts: attempt,
                        error,
                    });
                }

                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms = delay.as_millis() as u64,
                    error = %error,
                    "Request failed, will retry after backoff"
                );

                tokio::time::sleep(delay).await;
                delay = delay.mul_f64(policy.multiplier);
            }
        }
    }
}
