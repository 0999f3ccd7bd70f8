use crate::error::ExecutorError;
use crate::task::QueuedTask;

use fibre::mpsc::{self, UnboundedAsyncReceiver, UnboundedAsyncSender};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, TryAcquireError};
use tokio_util::sync::CancellationToken;

/// A queued task paired with the queue slot it occupies.
///
/// The slot is released when the message is dropped, which happens as soon as a
/// worker has received it. A slot is therefore only freed once its task has been
/// fully dequeued.
struct QueueMessage {
  task: QueuedTask,
  _slot: QueueSlot,
}

impl fmt::Debug for QueueMessage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("QueueMessage")
      .field("task_id", &self.task.task_id)
      .finish_non_exhaustive()
  }
}

/// One unit of queue capacity, taken from the gate at enqueue and returned on drop.
#[derive(Debug)]
struct QueueSlot {
  gate: Arc<Semaphore>,
}

impl Drop for QueueSlot {
  fn drop(&mut self) {
    self.gate.add_permits(1);
  }
}

/// A bounded multi-producer queue of tasks.
///
/// Capacity is enforced by a gate semaphore on top of an unbounded
/// `fibre::mpsc` channel, so producers get backpressure without a lock in the
/// send path.
pub(crate) struct TaskQueue {
  tx: UnboundedAsyncSender<QueueMessage>,
  rx: UnboundedAsyncReceiver<QueueMessage>,
  gate: Arc<Semaphore>,
  capacity: usize,
}

impl TaskQueue {
  pub(crate) fn new(capacity: usize) -> Self {
    let (tx, rx) = mpsc::unbounded_async();
    Self {
      tx,
      rx,
      gate: Arc::new(Semaphore::new(capacity)),
      capacity,
    }
  }

  /// Splits the queue into its producer and consumer halves.
  pub(crate) fn split(self) -> (QueueProducer, QueueConsumer) {
    (
      QueueProducer {
        tx: self.tx,
        gate: self.gate,
        capacity: self.capacity,
      },
      QueueConsumer { rx: self.rx },
    )
  }
}

pub(crate) struct QueueProducer {
  tx: UnboundedAsyncSender<QueueMessage>,
  gate: Arc<Semaphore>,
  capacity: usize,
}

/// The consumer half. Not cloneable; workers share it behind a lock.
pub(crate) struct QueueConsumer {
  rx: UnboundedAsyncReceiver<QueueMessage>,
}

impl fmt::Debug for QueueProducer {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("QueueProducer")
      .field("len", &self.len())
      .field("capacity", &self.capacity)
      .field("free_slots", &self.gate.available_permits())
      .finish_non_exhaustive()
  }
}

impl QueueProducer {
  /// Enqueues a task, waiting up to `timeout` for a free slot.
  ///
  /// A zero `timeout` never waits. Waiting ends early with `Closed` once
  /// `closing` is cancelled.
  pub(crate) async fn send(
    &self,
    task: QueuedTask,
    timeout: Duration,
    closing: &CancellationToken,
  ) -> Result<(), ExecutorError> {
    if closing.is_cancelled() || self.tx.is_closed() {
      return Err(ExecutorError::Closed);
    }

    let permit = if timeout.is_zero() {
      match self.gate.try_acquire() {
        Ok(permit) => permit,
        Err(TryAcquireError::NoPermits) => return Err(ExecutorError::Saturated { capacity: self.capacity }),
        Err(TryAcquireError::Closed) => return Err(ExecutorError::Closed),
      }
    } else {
      tokio::select! {
        biased;
        _ = closing.cancelled() => return Err(ExecutorError::Closed),
        acquired = tokio::time::timeout(timeout, self.gate.acquire()) => match acquired {
          Ok(Ok(permit)) => permit,
          Ok(Err(_)) => return Err(ExecutorError::Closed),
          Err(_) => {
            return Err(ExecutorError::SubmitTimeout {
              timeout,
              queue_length: self.len(),
            })
          }
        },
      }
    };

    // From here on the slot owns the release, whatever happens to the message.
    permit.forget();
    let message = QueueMessage {
      task,
      _slot: QueueSlot { gate: self.gate.clone() },
    };

    if self.tx.send(message).await.is_err() {
      // The rejected message was dropped with its slot.
      return Err(ExecutorError::Closed);
    }
    Ok(())
  }

  /// Closes the queue. Messages already queued can still be received.
  pub(crate) fn close(&self) {
    let _ = self.tx.close();
  }

  pub(crate) fn len(&self) -> usize {
    self.tx.len()
  }

  pub(crate) fn capacity(&self) -> usize {
    self.capacity
  }
}

impl QueueConsumer {
  /// Receives the next task, or `None` once the queue is closed and drained.
  ///
  /// The slot inside the received message is released here.
  pub(crate) async fn recv(&mut self) -> Option<QueuedTask> {
    self.rx.recv().await.ok().map(|message| message.task)
  }
}
