use crate::config::DispatcherConfig;
use crate::error::ExecutorError;
use crate::invoker::{self, default_panic_handler, PanicHandler};
use crate::lifecycle::{ExecutorState, Lifecycle};
use crate::task::Task;

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle as TokioHandle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, info_span, trace, warn, Instrument};

/// Runs every task in its own Tokio task, with at most `max_concurrent` running at once.
///
/// When all permits are taken, `dispatch` waits up to the configured wait timeout
/// for one to free up, racing the caller's cancellation token. There is no queue:
/// waiting callers are the backlog, and the order in which they are admitted is
/// unspecified.
pub struct Dispatcher {
  dispatcher_name: Arc<str>,
  max_concurrent: usize,
  wait_timeout: Duration,
  semaphore: Arc<Semaphore>,
  in_flight: TaskTracker,
  // Serializes the closed re-check with in-flight registration, and `close` with both.
  admission: Mutex<()>,
  lifecycle: Arc<Lifecycle>,
  panic_handler: PanicHandler,
  tokio_handle: TokioHandle,
  next_task_id: AtomicU64,
}

impl Dispatcher {
  /// Creates a dispatcher spawning tasks on `tokio_handle`. Panics inside tasks are logged.
  pub fn new(config: DispatcherConfig, tokio_handle: TokioHandle) -> Result<Arc<Self>, ExecutorError> {
    Self::with_panic_handler(config, tokio_handle, default_panic_handler())
  }

  /// Like [`Dispatcher::new`], routing task panics to `panic_handler`.
  pub fn with_panic_handler(
    config: DispatcherConfig,
    tokio_handle: TokioHandle,
    panic_handler: PanicHandler,
  ) -> Result<Arc<Self>, ExecutorError> {
    config.validate()?;

    info!(
      dispatcher_name = %config.name,
      max_concurrent = config.max_concurrent,
      wait_timeout = ?config.wait_timeout,
      "Dispatcher created."
    );

    Ok(Arc::new(Self {
      dispatcher_name: Arc::from(config.name.as_str()),
      max_concurrent: config.max_concurrent,
      wait_timeout: config.wait_timeout,
      semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
      in_flight: TaskTracker::new(),
      admission: Mutex::new(()),
      lifecycle: Arc::new(Lifecycle::new()),
      panic_handler,
      tokio_handle,
      next_task_id: AtomicU64::new(0),
    }))
  }

  pub fn name(&self) -> &str {
    &self.dispatcher_name
  }

  pub fn max_concurrent(&self) -> usize {
    self.max_concurrent
  }

  pub fn wait_timeout(&self) -> Duration {
    self.wait_timeout
  }

  /// Number of admitted tasks that have not finished yet.
  pub fn in_flight(&self) -> usize {
    self.in_flight.len()
  }

  pub fn available_permits(&self) -> usize {
    self.semaphore.available_permits()
  }

  pub fn state(&self) -> ExecutorState {
    self.lifecycle.state()
  }

  /// Admits `task` and spawns it, returning without waiting for it to run.
  ///
  /// If no permit is free, waits for one up to the wait timeout. Whichever comes
  /// first wins: a permit, the timeout, or `cancel` being cancelled.
  ///
  /// # Errors
  /// - `ExecutorError::Closed` if the dispatcher is closing or closed.
  /// - `ExecutorError::Cancelled` if `cancel` is, or becomes, cancelled before admission.
  /// - `ExecutorError::Saturated` if no permit is free and the wait timeout is zero.
  /// - `ExecutorError::WaitTimeout` if no permit freed up in time.
  pub async fn dispatch<F>(&self, cancel: &CancellationToken, task: F) -> Result<(), ExecutorError>
  where
    F: Future<Output = ()> + Send + 'static,
  {
    let admitted = self.admit(cancel).await;
    let result = admitted.and_then(|permit| self.launch(permit, Box::pin(task)));
    if let Err(e) = &result {
      warn!(dispatcher_name = %self.dispatcher_name, error = %e, "Dispatch: Task rejected.");
    }
    result
  }

  async fn admit(&self, cancel: &CancellationToken) -> Result<OwnedSemaphorePermit, ExecutorError> {
    if self.lifecycle.is_closing() {
      return Err(ExecutorError::Closed);
    }
    if cancel.is_cancelled() {
      return Err(ExecutorError::Cancelled);
    }

    match self.semaphore.clone().try_acquire_owned() {
      Ok(permit) => return Ok(permit),
      Err(TryAcquireError::Closed) => return Err(ExecutorError::Closed),
      Err(TryAcquireError::NoPermits) => {}
    }

    if self.wait_timeout.is_zero() {
      return Err(ExecutorError::Saturated {
        capacity: self.max_concurrent,
      });
    }

    trace!(dispatcher_name = %self.dispatcher_name, "Saturated. Waiting for a permit.");
    tokio::select! {
      _ = cancel.cancelled() => Err(ExecutorError::Cancelled),
      _ = tokio::time::sleep(self.wait_timeout) => Err(ExecutorError::WaitTimeout { timeout: self.wait_timeout }),
      acquired = self.semaphore.clone().acquire_owned() => acquired.map_err(|_| ExecutorError::Closed),
    }
  }

  fn launch(&self, permit: OwnedSemaphorePermit, task: Task) -> Result<(), ExecutorError> {
    let tracker_token = {
      let _admission = self.admission.lock();
      // `close` may have run while we were acquiring the permit.
      if self.lifecycle.is_closing() {
        drop(permit);
        return Err(ExecutorError::Closed);
      }
      self.in_flight.token()
    };

    let task_id = self.next_task_id.fetch_add(1, AtomicOrdering::Relaxed);
    debug!(dispatcher_name = %self.dispatcher_name, %task_id, "Task admitted. Spawning.");

    let panic_handler = self.panic_handler.clone();
    self.tokio_handle.spawn(
      async move {
        invoker::invoke(task, Some(&panic_handler)).await;
        // Permit first, so a drained dispatcher always reports all permits free.
        drop(permit);
        drop(tracker_token);
        trace!("Dispatched task finished. Permit released.");
      }
      .instrument(info_span!("dispatched_task", dispatcher_name = %self.dispatcher_name, %task_id)),
    );
    Ok(())
  }

  /// Stops admitting tasks and waits until every admitted task has finished.
  ///
  /// Callers blocked in `dispatch` are released with `ExecutorError::Closed`.
  /// Every call returns once the dispatcher is `Closed`; waiting has no upper
  /// bound. Dropping the returned future does not interrupt the drain.
  pub async fn close(&self) {
    let first = {
      let _admission = self.admission.lock();
      self.lifecycle.begin_close()
    };

    if first {
      info!(
        dispatcher_name = %self.dispatcher_name,
        in_flight = self.in_flight.len(),
        "Initiating dispatcher close. In-flight tasks will drain."
      );
      self.semaphore.close();
      self.in_flight.close();

      let in_flight = self.in_flight.clone();
      let lifecycle = self.lifecycle.clone();
      let dispatcher_name = self.dispatcher_name.clone();
      self.tokio_handle.spawn(async move {
        in_flight.wait().await;
        lifecycle.mark_closed();
        info!(dispatcher_name = %dispatcher_name, "All dispatched tasks finished. Dispatcher closed.");
      });
    } else {
      trace!(dispatcher_name = %self.dispatcher_name, "Close already in progress or completed.");
    }

    self.lifecycle.wait_closed().await;
  }
}

impl Drop for Dispatcher {
  fn drop(&mut self) {
    let first = {
      let _admission = self.admission.lock();
      self.lifecycle.begin_close()
    };
    if first {
      info!(
        dispatcher_name = %self.dispatcher_name,
        "Dispatcher dropped without close. In-flight tasks continue detached."
      );
      self.semaphore.close();
      self.in_flight.close();
    }
  }
}
