use bounded_exec::{retry_admission, Dispatcher, DispatcherConfig, ExecutorError, RetryPolicy};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::INFO)
    .with_target(false)
    .init();
  info!("--- Dispatcher Backpressure Example ---");

  let dispatcher = Dispatcher::new(
    DispatcherConfig::new(2)
      .name("backpressure")
      .wait_timeout(Duration::from_millis(50)),
    Handle::current(),
  )
  .expect("Invalid dispatcher configuration");
  let cancel = CancellationToken::new();

  for i in 0..5 {
    let task = async move {
      tokio::time::sleep(Duration::from_millis(200)).await;
      info!("Task {} finished.", i);
    };
    match dispatcher.dispatch(&cancel, task).await {
      Ok(()) => info!("Task {} admitted. In flight: {}", i, dispatcher.in_flight()),
      Err(e @ ExecutorError::WaitTimeout { .. }) => warn!("Task {} rejected: {}", i, e),
      Err(e) => warn!("Task {} failed to dispatch: {}", i, e),
    }
  }

  info!("Retrying with exponential backoff until a permit frees up.");
  let policy = RetryPolicy::new(6, Duration::from_millis(25));
  match retry_admission(&policy, &cancel, || {
    dispatcher.dispatch(&cancel, async { info!("Retried task ran.") })
  })
  .await
  {
    Ok(attempts) => info!("Retried task admitted after {} attempts.", attempts),
    Err(e) => warn!("Retried task gave up: {}", e),
  }

  dispatcher.close().await;
  info!("--- Dispatcher Backpressure Example End ---");
}
