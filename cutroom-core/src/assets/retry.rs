//! Reusable retry policy for network operations.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::config::DownloadConfig;

/// Errors that know whether another attempt could succeed.
pub trait Retryable: Display {
    fn is_retryable(&self) -> bool;
}

/// Bounded exponential backoff.
///
/// Attempt numbers are 1-based; the delay after attempt `n` is
/// `base_delay * 2^(n-1)`, capped at `max_delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&DownloadConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &DownloadConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_retry_delay,
            max_delay: config.max_retry_delay,
        }
    }

    /// Delay to wait after the given failed attempt.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    /// Whether another attempt is allowed after `attempt` failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Runs `operation` until it succeeds, fails terminally, or attempts run out.
    ///
    /// Returns the last error on failure.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, E>
    where
        E: Retryable,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() => {
                    tracing::warn!(
                        attempt,
                        operation = label,
                        error = %err,
                        "Giving up on non-retryable error"
                    );
                    return Err(err);
                }
                Err(err) if !self.should_retry(attempt) => {
                    tracing::warn!(
                        attempt,
                        operation = label,
                        error = %err,
                        "Retries exhausted"
                    );
                    return Err(err);
                }
                Err(err) => {
                    let delay = self.calculate_delay(attempt);
                    tracing::debug!(
                        attempt,
                        operation = label,
                        wait = ?delay,
                        error = %err,
                        "Retrying"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}
