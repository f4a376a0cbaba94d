// Retry combinator for asynchronous operations

use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::error::ApiError;

/// How many times, and how far apart, an operation is attempted
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    pub max_attempts: usize,
    pub interval: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
        }
    }

    /// No pause between attempts
    pub fn immediate(max_attempts: usize) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// the attempts run out. The last error is returned.
pub async fn retry_if_needed<T, F, Fut>(
    policy: RetryPolicy,
    mut operation: F,
) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() || attempt >= policy.max_attempts => return Err(e),
            Err(e) => {
                debug!(
                    "Attempt {}/{} failed: {}; retrying",
                    attempt, policy.max_attempts, e
                );
                attempt += 1;
                if !policy.interval.is_zero() {
                    tokio::time::sleep(policy.interval).await;
                }
            }
        }
    }
}
