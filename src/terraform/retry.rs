//! Constant backoff retry for provider calls.
//!
//! The delay between attempts never grows: a provider that fails
//! transiently is usually restarting a connection, not overloaded.

use crate::error::ProviderError;
use std::future::Future;
use std::time::Duration;

/// Bounded retry with a fixed delay between attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first call (`>= 1`).
    pub max_attempts: u32,
    /// Delay between two attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    /// Returns a policy with:
    /// - `max_attempts = 4` (one call and three retries);
    /// - `delay = 100ms`.
    fn default() -> Self {
        Self {
            max_attempts: 4,
            delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Run `op` until it succeeds, fails with a non retryable error, or the
    /// attempt budget is spent. The last error is returned on exhaustion.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, ProviderError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    tracing::debug!(attempt, max_attempts, error = %err, "Retrying provider call");
                    attempt += 1;
                    tokio::time::sleep(self.delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
