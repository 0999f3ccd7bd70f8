use bounded_exec::{PoolConfig, WorkerPool};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::info;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();
  info!("--- Basic Worker Pool Example ---");

  let pool = WorkerPool::new(
    PoolConfig::new(4, 2).name("basic_pool").submit_timeout(Duration::from_secs(1)),
    Handle::current(),
  )
  .expect("Invalid pool configuration");

  // Tasks report results through a channel they own; the pool never sees them.
  let (results_tx, mut results_rx) = mpsc::unbounded_channel();
  for i in 0..6u64 {
    let results_tx = results_tx.clone();
    pool
      .submit(async move {
        tokio::time::sleep(Duration::from_millis(50 * (i % 3 + 1))).await;
        let _ = results_tx.send(i * i);
      })
      .await
      .expect("Failed to submit task");
    info!("Submitted task {}. Queue length: {}", i, pool.queue_length());
  }
  drop(results_tx);

  info!("Closing pool; queued tasks drain first.");
  pool.close().await;

  while let Some(square) = results_rx.recv().await {
    info!("Result: {}", square);
  }
  info!("--- Basic Worker Pool Example End ---");
}
