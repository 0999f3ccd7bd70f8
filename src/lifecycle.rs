use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;

/// Lifecycle of an executor. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
  /// Accepting tasks.
  Open,
  /// No longer accepting tasks; admitted work is draining.
  Closing,
  /// Every admitted task has finished. Terminal.
  Closed,
}

/// Shared Open -> Closing -> Closed bookkeeping.
#[derive(Debug)]
pub(crate) struct Lifecycle {
  transitioned: AtomicBool,
  closing: CancellationToken,
  closed: CancellationToken,
}

impl Lifecycle {
  pub(crate) fn new() -> Self {
    Self {
      transitioned: AtomicBool::new(false),
      closing: CancellationToken::new(),
      closed: CancellationToken::new(),
    }
  }

  /// Moves to `Closing`. Returns `true` only for the call that made the transition.
  pub(crate) fn begin_close(&self) -> bool {
    let first = self
      .transitioned
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_ok();
    self.closing.cancel();
    first
  }

  pub(crate) fn is_closing(&self) -> bool {
    self.closing.is_cancelled()
  }

  /// Token cancelled once closing begins; used to wake blocked admissions.
  pub(crate) fn closing_token(&self) -> &CancellationToken {
    &self.closing
  }

  pub(crate) fn mark_closed(&self) {
    self.closed.cancel();
  }

  pub(crate) async fn wait_closed(&self) {
    self.closed.cancelled().await;
  }

  pub(crate) fn state(&self) -> ExecutorState {
    if self.closed.is_cancelled() {
      ExecutorState::Closed
    } else if self.closing.is_cancelled() {
      ExecutorState::Closing
    } else {
      ExecutorState::Open
    }
  }
}
