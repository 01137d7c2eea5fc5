//! Bounded retry with linear backoff
//!
//! Attempt `n` that fails with a retryable error is followed by a delay of
//! `n * base_delay`. Non-retryable errors are returned immediately.

use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::ServiceConfig;
use crate::error::SwapError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn from_service(service: &ServiceConfig) -> Self {
        Self::new(service.max_retry_attempts, service.backoff_base())
    }

    /// Delay after failed attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

/// Runs `operation` until it succeeds, fails permanently, or attempts run out.
///
/// The operation receives the 1-based attempt number. The last error is returned
/// when every attempt fails.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut operation: F,
) -> Result<T, SwapError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, SwapError>>,
{
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    info!("{} succeeded on attempt {}/{}", label, attempt, policy.max_attempts);
                }
                return Ok(value);
            }
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "{} failed on attempt {}/{} ({}), retrying in {:?}",
                    label, attempt, policy.max_attempts, e, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                warn!("{} failed on attempt {}/{}: {}", label, attempt, policy.max_attempts, e);
                return Err(e);
            }
        }
    }
}
