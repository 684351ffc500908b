//! Retry utilities with bounded backoff.
//!
//! Every remote call that may fail transiently goes through
//! [`retry_with_backoff`]. The caller supplies the classifier deciding which
//! failures are worth another attempt; anything else is returned unchanged so
//! callers can still inspect the original status.
//!
//! # Example
//!
//! ```ignore
//! use canopy_common::retry::{retry_api_call, RetryConfig};
//!
//! let created = retry_api_call("create Organization", || async {
//!     client.create(ResourceKind::Organization, &body).await
//! })
//! .await;
//! ```

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::Error;

/// How the delay grows between attempts
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Backoff {
    /// `delay = min(delay * multiplier, max_delay)` after every attempt
    Exponential {
        /// Multiplier applied after each failed attempt
        multiplier: f64,
    },
    /// `delay = initial_delay * attempt`, capped at `max_delay`
    Linear,
}

/// Configuration for operations that may fail transiently.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Growth strategy
    pub backoff: Backoff,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::control_plane()
    }
}

impl RetryConfig {
    /// Policy for control-plane writes: 6 attempts, 1s doubling up to 16s
    pub fn control_plane() -> Self {
        Self {
            max_attempts: 6,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(16),
            backoff: Backoff::Exponential { multiplier: 2.0 },
        }
    }

    /// Policy for metrics HTTP requests: 6 attempts, 2s x attempt
    pub fn metrics_http() -> Self {
        Self {
            max_attempts: 6,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(12),
            backoff: Backoff::Linear,
        }
    }

    /// Same policy with a different attempt budget
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Delay to sleep after the given failed attempt (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let delay = match self.backoff {
            Backoff::Exponential { multiplier } => {
                let exp = attempt.saturating_sub(1) as i32;
                Duration::from_secs_f64(
                    (self.initial_delay.as_secs_f64() * multiplier.powi(exp))
                        .min(self.max_delay.as_secs_f64()),
                )
            }
            Backoff::Linear => self.initial_delay.saturating_mul(attempt),
        };
        delay.min(self.max_delay)
    }
}

/// Execute an async operation, retrying failures the classifier accepts.
///
/// # Arguments
/// * `config` - Retry configuration
/// * `operation_name` - Name for logging purposes
/// * `should_retry` - Classifier; `false` returns the error immediately
/// * `operation` - The async operation to retry
///
/// # Returns
/// The result of the operation, or the last error unchanged.
pub async fn retry_with_backoff<F, Fut, T, E, C>(
    config: &RetryConfig,
    operation_name: &str,
    should_retry: C,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    C: Fn(&E) -> bool,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !should_retry(&e) {
                    debug!(
                        operation = %operation_name,
                        attempt = attempt,
                        error = %e,
                        "Operation failed with non-retryable error"
                    );
                    return Err(e);
                }

                if attempt >= config.max_attempts {
                    warn!(
                        operation = %operation_name,
                        attempt = attempt,
                        max_attempts = config.max_attempts,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                let delay = config.delay_after(attempt);
                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    max_attempts = config.max_attempts,
                    error = %e,
                    delay_s = delay.as_secs_f64(),
                    "Operation failed, retrying"
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Run a control-plane call under [`RetryConfig::control_plane`], retrying
/// only errors classified by [`Error::is_retryable`].
pub async fn retry_api_call<F, Fut, T>(operation_name: &str, operation: F) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    retry_with_backoff(
        &RetryConfig::control_plane(),
        operation_name,
        Error::is_retryable,
        operation,
    )
    .await
}
