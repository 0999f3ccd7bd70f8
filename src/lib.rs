//! Tokio-based bounded executors with backpressure, panic isolation and
//! draining shutdown.
//!
//! - [`WorkerPool`]: a bounded FIFO queue feeding a fixed number of workers.
//! - [`Dispatcher`]: one Tokio task per submitted future, gated by a counting
//!   semaphore with a bounded wait for a free permit.
//!
//! Admission is synchronous: `submit`/`dispatch` either accept the task or return
//! an [`ExecutorError`]. Execution is fire-and-forget: a task's outcome, panics
//! included, never flows back to the submitter. Panics go to a [`PanicHandler`].

mod config;
mod dispatcher;
mod error;
mod invoker;
mod lifecycle;
mod pool;
mod registry;
mod retry;
mod task;
mod task_queue;

pub use config::{
  DispatcherConfig, ExecutorsConfig, PoolConfig, DEFAULT_MAX_CONCURRENT, DEFAULT_SUBMIT_TIMEOUT, DEFAULT_WAIT_TIMEOUT,
  MAX_CAPACITY,
};
pub use dispatcher::Dispatcher;
pub use error::ExecutorError;
pub use invoker::{default_panic_handler, invoke, invoke_blocking, InvokeOutcome, PanicHandler, TaskPanic};
pub use lifecycle::ExecutorState;
pub use pool::WorkerPool;
pub use registry::ExecutorRegistry;
pub use retry::{retry_admission, RetryPolicy, DEFAULT_MAX_BACKOFF, DEFAULT_RETRY_INTERVAL};
pub use task::Task;
