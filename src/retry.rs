//! Caller-side retry for transient admission failures.
//!
//! Executors never retry on their own: a saturated executor hands the decision
//! back to the caller. [`retry_admission`] is a ready-made policy for callers
//! that want to back off and try again.

use crate::error::ExecutorError;

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(10);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Total attempts including the first. Zero is treated as one.
  pub max_attempts: u32,
  /// Base delay; the n-th wait is `interval * 2^(n-1)`. Zero means the default.
  pub interval: Duration,
  pub max_backoff: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      interval: DEFAULT_RETRY_INTERVAL,
      max_backoff: DEFAULT_MAX_BACKOFF,
    }
  }
}

impl RetryPolicy {
  pub fn new(max_attempts: u32, interval: Duration) -> Self {
    Self {
      max_attempts,
      interval,
      ..Self::default()
    }
  }

  /// Delay to wait after the `failed_attempts`-th failure.
  pub fn backoff(&self, failed_attempts: u32) -> Duration {
    let interval = if self.interval.is_zero() {
      DEFAULT_RETRY_INTERVAL
    } else {
      self.interval
    };
    1u32
      .checked_shl(failed_attempts.saturating_sub(1))
      .and_then(|factor| interval.checked_mul(factor))
      .map_or(self.max_backoff, |delay| delay.min(self.max_backoff))
  }
}

/// Runs `attempt` until it is admitted, fails with a non-retryable error, or
/// `policy.max_attempts` is used up. Returns the number of attempts made.
///
/// `attempt` is called once per try and must build a fresh submission each time,
/// since a rejected task is dropped with the rejection.
///
/// # Errors
/// The last error seen, or `ExecutorError::Cancelled` if `cancel` fires during a backoff.
pub async fn retry_admission<F, Fut>(
  policy: &RetryPolicy,
  cancel: &CancellationToken,
  mut attempt: F,
) -> Result<u32, ExecutorError>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<(), ExecutorError>>,
{
  let max_attempts = policy.max_attempts.max(1);
  let mut attempts = 0;

  loop {
    attempts += 1;
    let error = match attempt().await {
      Ok(()) => return Ok(attempts),
      Err(e) => e,
    };
    if !error.is_retryable() || attempts >= max_attempts {
      return Err(error);
    }

    let delay = policy.backoff(attempts);
    debug!(attempt = attempts, max_attempts, ?delay, %error, "Admission rejected. Backing off before retrying.");
    tokio::select! {
      _ = cancel.cancelled() => return Err(ExecutorError::Cancelled),
      _ = tokio::time::sleep(delay) => {}
    }
  }
}
