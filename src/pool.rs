use crate::config::PoolConfig;
use crate::error::ExecutorError;
use crate::invoker::{self, default_panic_handler, InvokeOutcome, PanicHandler};
use crate::lifecycle::{ExecutorState, Lifecycle};
use crate::task::QueuedTask;
use crate::task_queue::{QueueConsumer, QueueProducer, TaskQueue};

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle as TokioHandle;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, debug_span, error, info, info_span, trace, warn, Instrument};

/// A fixed set of workers draining a bounded FIFO queue.
///
/// At most `worker_count` tasks run at once; at most `queue_capacity` more wait
/// in the queue. `submit` applies backpressure by waiting up to the configured
/// submit timeout for queue space.
///
/// Unlike [`Dispatcher::dispatch`](crate::Dispatcher::dispatch), `submit` takes
/// no cancellation token: the submit timeout is the only bound on how long a
/// producer can be held.
pub struct WorkerPool {
  pool_name: Arc<str>,
  worker_count: usize,
  submit_timeout: Duration,
  producer: QueueProducer,
  active_tasks: Arc<AtomicUsize>,
  lifecycle: Arc<Lifecycle>,
  workers: Mutex<Vec<JoinHandle<()>>>,
  tokio_handle: TokioHandle,
  next_task_id: AtomicU64,
}

/// Counts a running task for as long as it is alive.
struct ActiveTask<'a>(&'a AtomicUsize);

impl<'a> ActiveTask<'a> {
  fn enter(counter: &'a AtomicUsize) -> Self {
    counter.fetch_add(1, AtomicOrdering::SeqCst);
    Self(counter)
  }
}

impl Drop for ActiveTask<'_> {
  fn drop(&mut self) {
    self.0.fetch_sub(1, AtomicOrdering::SeqCst);
  }
}

impl WorkerPool {
  /// Creates the pool and starts its workers on `tokio_handle`.
  /// Panics inside tasks are logged.
  pub fn new(config: PoolConfig, tokio_handle: TokioHandle) -> Result<Arc<Self>, ExecutorError> {
    Self::with_panic_handler(config, tokio_handle, default_panic_handler())
  }

  /// Like [`WorkerPool::new`], routing task panics to `panic_handler`.
  pub fn with_panic_handler(
    config: PoolConfig,
    tokio_handle: TokioHandle,
    panic_handler: PanicHandler,
  ) -> Result<Arc<Self>, ExecutorError> {
    config.validate()?;

    let (producer, consumer) = TaskQueue::new(config.queue_capacity).split();
    let consumer = Arc::new(AsyncMutex::new(consumer));
    let pool_name: Arc<str> = Arc::from(config.name.as_str());
    let active_tasks = Arc::new(AtomicUsize::new(0));

    let workers: Vec<JoinHandle<()>> = (0..config.worker_count)
      .map(|worker_id| {
        tokio_handle.spawn(
          Self::run_worker_loop(consumer.clone(), active_tasks.clone(), panic_handler.clone())
            .instrument(info_span!("pool_worker", pool_name = %pool_name, worker_id)),
        )
      })
      .collect();

    info!(
      pool_name = %pool_name,
      queue_capacity = config.queue_capacity,
      worker_count = config.worker_count,
      submit_timeout = ?config.submit_timeout,
      "Worker pool started."
    );

    Ok(Arc::new(Self {
      pool_name,
      worker_count: config.worker_count,
      submit_timeout: config.submit_timeout,
      producer,
      active_tasks,
      lifecycle: Arc::new(Lifecycle::new()),
      workers: Mutex::new(workers),
      tokio_handle,
      next_task_id: AtomicU64::new(0),
    }))
  }

  pub fn name(&self) -> &str {
    &self.pool_name
  }

  /// Number of queued tasks not yet picked up by a worker.
  ///
  /// Advisory only: the value may be stale by the time it is read.
  pub fn queue_length(&self) -> usize {
    self.producer.len()
  }

  pub fn queue_capacity(&self) -> usize {
    self.producer.capacity()
  }

  pub fn worker_count(&self) -> usize {
    self.worker_count
  }

  pub fn submit_timeout(&self) -> Duration {
    self.submit_timeout
  }

  /// Number of tasks currently executing on a worker.
  pub fn active_task_count(&self) -> usize {
    self.active_tasks.load(AtomicOrdering::SeqCst)
  }

  pub fn state(&self) -> ExecutorState {
    self.lifecycle.state()
  }

  /// Enqueues `task` for execution by one of the workers.
  ///
  /// Returns as soon as the task is queued; it does not wait for the task to run.
  /// If the queue is full, waits up to the submit timeout for space.
  ///
  /// # Errors
  /// - `ExecutorError::Closed` if the pool is closing or closed, without waiting.
  /// - `ExecutorError::SubmitTimeout` if no space freed up in time.
  /// - `ExecutorError::Saturated` if the queue is full and the submit timeout is zero.
  pub async fn submit<F>(&self, task: F) -> Result<(), ExecutorError>
  where
    F: Future<Output = ()> + Send + 'static,
  {
    if self.lifecycle.is_closing() {
      warn!(pool_name = %self.pool_name, "Submit: Attempted to submit task to a pool that is closing or closed.");
      return Err(ExecutorError::Closed);
    }

    let task_id = self.next_task_id.fetch_add(1, AtomicOrdering::Relaxed);
    trace!(pool_name = %self.pool_name, %task_id, queue_length = self.queue_length(), "Submitting task to queue.");

    let queued = QueuedTask {
      task_id,
      future: Box::pin(task),
    };
    match self
      .producer
      .send(queued, self.submit_timeout, self.lifecycle.closing_token())
      .await
    {
      Ok(()) => {
        debug!(pool_name = %self.pool_name, %task_id, "Task queued.");
        Ok(())
      }
      Err(e) => {
        warn!(pool_name = %self.pool_name, %task_id, error = %e, "Submit: Task rejected.");
        Err(e)
      }
    }
  }

  /// Stops accepting tasks and waits until every queued and running task has finished.
  ///
  /// Only the first call starts the shutdown; every call returns once the pool is
  /// `Closed`. Waiting has no upper bound. Dropping the returned future stops
  /// waiting but does not interrupt the drain.
  pub async fn close(&self) {
    if self.lifecycle.begin_close() {
      info!(
        pool_name = %self.pool_name,
        queue_length = self.queue_length(),
        active_tasks = self.active_task_count(),
        "Initiating pool close. Queued tasks will drain."
      );
      self.producer.close();

      let workers = std::mem::take(&mut *self.workers.lock());
      let lifecycle = self.lifecycle.clone();
      let pool_name = self.pool_name.clone();
      self.tokio_handle.spawn(async move {
        for worker in workers {
          if let Err(join_error) = worker.await {
            error!(pool_name = %pool_name, "Error joining pool worker during close: {:?}", join_error);
          }
        }
        lifecycle.mark_closed();
        info!(pool_name = %pool_name, "All workers exited. Pool closed.");
      });
    } else {
      trace!(pool_name = %self.pool_name, "Close already in progress or completed.");
    }

    self.lifecycle.wait_closed().await;
  }

  async fn run_worker_loop(
    consumer: Arc<AsyncMutex<QueueConsumer>>,
    active_tasks: Arc<AtomicUsize>,
    panic_handler: PanicHandler,
  ) {
    trace!("Worker started.");

    loop {
      // The lock is only held while waiting for the next task, never while running it.
      let next = {
        let mut consumer = consumer.lock().await;
        consumer.recv().await
      };
      let Some(QueuedTask { task_id, future }) = next else {
        break;
      };

      debug!(%task_id, "Dequeued task.");
      let _active = ActiveTask::enter(&active_tasks);
      let outcome = invoker::invoke(future, Some(&panic_handler))
        .instrument(debug_span!("pool_task", %task_id))
        .await;
      if outcome == InvokeOutcome::Panicked {
        warn!(%task_id, "Task panicked; worker continues.");
      }
    }

    debug!("Queue closed and drained. Worker exiting.");
  }
}

impl Drop for WorkerPool {
  fn drop(&mut self) {
    // Dropping must not block, so the workers are only told to finish the queue and exit.
    if self.lifecycle.begin_close() {
      info!(
        pool_name = %self.pool_name,
        "WorkerPool dropped without close. Closing queue; queued tasks will still run."
      );
      self.producer.close();
    } else {
      trace!(pool_name = %self.pool_name, "Drop: Close already initiated.");
    }
  }
}
