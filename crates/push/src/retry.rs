//! Bounded retry with exponential backoff.

use crate::error::{ApiError, PushError};
use ferry_core::config::RetryConfig;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Attempt bookkeeping passed to every retried operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryStatus {
    /// 1-based attempt number.
    pub attempt: u32,
    /// Total time slept before this attempt.
    pub cumulative_delay: Duration,
}

impl RetryStatus {
    /// Status of the first attempt.
    pub fn first() -> Self {
        Self {
            attempt: 1,
            cumulative_delay: Duration::ZERO,
        }
    }

    /// Number of retries that happened before this attempt.
    pub fn retries(&self) -> u32 {
        self.attempt - 1
    }
}

impl Default for RetryStatus {
    fn default() -> Self {
        Self::first()
    }
}

/// Errors that know whether another attempt could help.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for PushError {
    fn is_retryable(&self) -> bool {
        PushError::is_retryable(self)
    }
}

impl Retryable for ApiError {
    fn is_retryable(&self) -> bool {
        ApiError::is_retryable(self)
    }
}

/// Backoff policy: `base_delay * 2^n` before retry `n + 1`, at most `max_retries`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_retries: u32,
}

impl RetryPolicy {
    pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    pub fn new(base_delay: Duration, max_retries: u32) -> Self {
        Self {
            base_delay,
            max_retries,
        }
    }

    /// Delay slept after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    /// Total attempts including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BASE_DELAY, Self::DEFAULT_MAX_RETRIES)
    }
}

impl From<RetryConfig> for RetryPolicy {
    fn from(config: RetryConfig) -> Self {
        Self::new(config.base_delay(), config.max_retries)
    }
}

/// Run `op` until it succeeds, fails terminally, or the policy is exhausted.
///
/// Each attempt starts from scratch; nothing from a failed attempt is reused.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, E>
where
    F: FnMut(RetryStatus) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    let mut status = RetryStatus::first();
    loop {
        match op(status).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && status.attempt < policy.max_attempts() => {
                let delay = policy.delay_after(status.attempt);
                tracing::warn!(
                    attempt = status.attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                status = RetryStatus {
                    attempt: status.attempt + 1,
                    cumulative_delay: status.cumulative_delay.saturating_add(delay),
                };
            }
            Err(err) => return Err(err),
        }
    }
}
