use bounded_exec::{Dispatcher, DispatcherConfig, PanicHandler, PoolConfig, TaskPanic, WorkerPool};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();
  info!("--- Task Panic Example ---");

  // The default handler logs at error level; this one reports a short summary instead.
  let handler: PanicHandler = Arc::new(|panic: TaskPanic| {
    warn!("Custom handler caught a panic: {}", panic.message().unwrap_or("<non-string payload>"));
  });

  let pool = WorkerPool::with_panic_handler(PoolConfig::new(5, 1).name("panic_pool"), Handle::current(), handler.clone())
    .expect("Invalid pool configuration");
  pool
    .submit(async {
      info!("Panicking Task: Starting...");
      tokio::time::sleep(Duration::from_millis(100)).await;
      panic!("This task is designed to panic!");
    })
    .await
    .expect("Failed to submit panicking task");
  pool
    .submit(async { info!("The worker survived and ran the next task.") })
    .await
    .expect("Failed to submit follow-up task");
  pool.close().await;

  // Without a custom handler the panic is logged with its backtrace.
  let dispatcher = Dispatcher::new(DispatcherConfig::new(1).name("panic_dispatcher"), Handle::current())
    .expect("Invalid dispatcher configuration");
  dispatcher
    .dispatch(&CancellationToken::new(), async { panic!("Dispatched task panicked") })
    .await
    .expect("Failed to dispatch panicking task");
  dispatcher.close().await;

  info!("--- Task Panic Example End ---");
}
