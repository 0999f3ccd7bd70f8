//! Panic isolation for task bodies.
//!
//! Every execution path in the crate runs its task through [`invoke`] (or
//! [`invoke_blocking`] for synchronous closures). A panic inside the task is
//! caught, handed to a [`PanicHandler`], and never unwinds into the worker loop,
//! the dispatcher, or sibling tasks.

use std::any::Any;
use std::backtrace::Backtrace;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures::FutureExt;
use tracing::{error, trace};

/// A panic recovered from a task.
pub struct TaskPanic {
  payload: Box<dyn Any + Send + 'static>,
  backtrace: Backtrace,
}

impl TaskPanic {
  fn new(payload: Box<dyn Any + Send + 'static>) -> Self {
    Self {
      payload,
      backtrace: Backtrace::force_capture(),
    }
  }

  /// The panic message, if the payload was a `&str` or a `String`.
  pub fn message(&self) -> Option<&str> {
    if let Some(s) = self.payload.downcast_ref::<&'static str>() {
      Some(s)
    } else {
      self.payload.downcast_ref::<String>().map(String::as_str)
    }
  }

  /// Backtrace captured at the point the panic was recovered.
  pub fn backtrace(&self) -> &Backtrace {
    &self.backtrace
  }

  pub fn payload(&self) -> &(dyn Any + Send) {
    &*self.payload
  }

  /// Consumes the panic and returns the original payload, e.g. to `resume_unwind` it elsewhere.
  pub fn into_payload(self) -> Box<dyn Any + Send + 'static> {
    self.payload
  }
}

impl fmt::Debug for TaskPanic {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TaskPanic")
      .field("message", &self.message().unwrap_or("<non-string payload>"))
      .finish_non_exhaustive()
  }
}

/// Callback receiving panics recovered from tasks.
pub type PanicHandler = Arc<dyn Fn(TaskPanic) + Send + Sync + 'static>;

/// Whether an invoked task ran to completion or panicked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokeOutcome {
  Completed,
  Panicked,
}

/// The handler used when none is supplied: logs the panic and carries on.
pub fn default_panic_handler() -> PanicHandler {
  Arc::new(log_panic)
}

fn log_panic(panic: TaskPanic) {
  error!(
    panic_message = panic.message().unwrap_or("<non-string payload>"),
    backtrace = %panic.backtrace(),
    "Task panicked during execution."
  );
}

/// Runs `task` to completion in the current task context, containing any panic.
///
/// The panic, if any, is passed to `on_panic` (or the logging default) before
/// this returns. No panic escapes, including one raised by the handler itself.
pub async fn invoke<F>(task: F, on_panic: Option<&PanicHandler>) -> InvokeOutcome
where
  F: Future<Output = ()> + Send,
{
  match AssertUnwindSafe(task).catch_unwind().await {
    Ok(()) => {
      trace!("Task executed successfully.");
      InvokeOutcome::Completed
    }
    Err(payload) => {
      report(TaskPanic::new(payload), on_panic);
      InvokeOutcome::Panicked
    }
  }
}

/// Synchronous counterpart of [`invoke`] for blocking closures.
pub fn invoke_blocking<F>(f: F, on_panic: Option<&PanicHandler>) -> InvokeOutcome
where
  F: FnOnce(),
{
  match panic::catch_unwind(AssertUnwindSafe(f)) {
    Ok(()) => InvokeOutcome::Completed,
    Err(payload) => {
      report(TaskPanic::new(payload), on_panic);
      InvokeOutcome::Panicked
    }
  }
}

fn report(task_panic: TaskPanic, on_panic: Option<&PanicHandler>) {
  let outcome = match on_panic {
    Some(handler) => panic::catch_unwind(AssertUnwindSafe(|| handler(task_panic))),
    None => {
      log_panic(task_panic);
      Ok(())
    }
  };
  if outcome.is_err() {
    error!("A panic handler panicked while handling a task panic.");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Mutex;

  fn recording_handler() -> (PanicHandler, Arc<Mutex<Vec<String>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let handler: PanicHandler = Arc::new(move |p: TaskPanic| {
      sink.lock().unwrap().push(p.message().unwrap_or("?").to_string());
    });
    (handler, seen)
  }

  #[tokio::test]
  async fn test_invoke_completed_task_skips_handler() {
    let (handler, seen) = recording_handler();
    let outcome = invoke(async {}, Some(&handler)).await;
    assert_eq!(outcome, InvokeOutcome::Completed);
    assert!(seen.lock().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_invoke_reports_panic_once() {
    let (handler, seen) = recording_handler();
    let outcome = invoke(
      async {
        tokio::task::yield_now().await;
        panic!("boom");
      },
      Some(&handler),
    )
    .await;
    assert_eq!(outcome, InvokeOutcome::Panicked);
    assert_eq!(*seen.lock().unwrap(), vec!["boom".to_string()]);
  }

  #[tokio::test]
  async fn test_invoke_without_handler_logs_and_returns() {
    let outcome = invoke(async { panic!("logged only") }, None).await;
    assert_eq!(outcome, InvokeOutcome::Panicked);
  }

  #[test]
  fn test_invoke_blocking_recovers_formatted_payload() {
    let (handler, seen) = recording_handler();
    let outcome = invoke_blocking(|| panic!("value {}", 42), Some(&handler));
    assert_eq!(outcome, InvokeOutcome::Panicked);
    assert_eq!(*seen.lock().unwrap(), vec!["value 42".to_string()]);
  }

  #[test]
  fn test_original_payload_is_recoverable() {
    #[derive(Debug, PartialEq)]
    struct Custom(u32);

    let recovered = Arc::new(Mutex::new(None));
    let slot = recovered.clone();
    let handler: PanicHandler = Arc::new(move |p: TaskPanic| {
      assert!(p.message().is_none());
      let payload = p.into_payload();
      *slot.lock().unwrap() = payload.downcast::<Custom>().ok().map(|b| *b);
    });

    invoke_blocking(|| std::panic::panic_any(Custom(7)), Some(&handler));
    assert_eq!(*recovered.lock().unwrap(), Some(Custom(7)));
  }

  #[test]
  fn test_panicking_handler_is_contained() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let handler: PanicHandler = Arc::new(move |_| {
      counter.fetch_add(1, Ordering::SeqCst);
      panic!("handler failure");
    });
    let outcome = invoke_blocking(|| panic!("task failure"), Some(&handler));
    assert_eq!(outcome, InvokeOutcome::Panicked);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }
}
