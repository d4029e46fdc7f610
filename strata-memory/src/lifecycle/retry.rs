//! Bounded exponential backoff over the lifecycle clock.

use std::future::Future;

use super::config::RetryPolicy;
use crate::clock::Clock;

/// Why a retried call gave up.
#[derive(Debug, Clone)]
pub struct RetryFailure<E> {
    /// Attempts made
    pub attempts: u32,
    /// Error of the last attempt
    pub error: E,
    /// `true` if every attempt failed with a retryable error
    pub exhausted: bool,
}

/// Call `attempt` until it succeeds, fails with a non-retryable error, or
/// `policy.max_attempts` is reached. Sleeps go through `clock`.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    clock: &dyn Clock,
    operation: &'static str,
    is_retryable: impl Fn(&E) -> bool,
    mut attempt: F,
) -> Result<T, RetryFailure<E>>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    assert!(policy.max_attempts > 0, "max_attempts must be positive");

    let mut attempts = 0;
    loop {
        attempts += 1;
        let error = match attempt().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if !is_retryable(&error) {
            return Err(RetryFailure {
                attempts,
                error,
                exhausted: false,
            });
        }
        if attempts >= policy.max_attempts {
            tracing::warn!(operation, attempts, error = %error, "retries exhausted");
            return Err(RetryFailure {
                attempts,
                error,
                exhausted: true,
            });
        }

        let delay = policy.delay_for(attempts);
        tracing::debug!(
            operation,
            attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %error,
            "retrying"
        );
        clock.sleep(delay).await;
    }
}
