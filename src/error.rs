use std::time::Duration;

use thiserror::Error;

/// Errors returned by the executors at admission or construction time.
///
/// Failures inside a running task are never reported here; they are only
/// visible through the panic handler or whatever the task itself reports.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutorError {
  #[error("Invalid executor configuration: {0}")]
  InvalidConfig(String),

  #[error("Executor is closing or closed, cannot accept new tasks")]
  Closed,

  #[error("Timed out after {timeout:?} waiting for queue space (queue length: {queue_length})")]
  SubmitTimeout { timeout: Duration, queue_length: usize },

  #[error("Timed out after {timeout:?} waiting for a concurrency permit")]
  WaitTimeout { timeout: Duration },

  #[error("Executor is saturated (capacity {capacity}) and no wait timeout is configured")]
  Saturated { capacity: usize },

  #[error("Admission was cancelled by the caller")]
  Cancelled,

  #[error("An executor named '{0}' is already registered")]
  AlreadyRegistered(String),
}

impl ExecutorError {
  /// Returns `true` for transient backpressure signals that a caller may retry.
  pub fn is_retryable(&self) -> bool {
    matches!(
      self,
      ExecutorError::SubmitTimeout { .. } | ExecutorError::WaitTimeout { .. } | ExecutorError::Saturated { .. }
    )
  }
}
