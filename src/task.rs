use std::future::Future;
use std::pin::Pin;

/// The type of future the executors run.
/// A task produces no value; results travel through channels the task owns.
pub type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Internal representation of a task waiting in the pool queue.
pub(crate) struct QueuedTask {
  pub(crate) task_id: u64,
  pub(crate) future: Task,
}
