use bounded_exec::{ExecutorRegistry, ExecutorsConfig};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::info;

const EXECUTORS: &str = r#"
[pools.emails]
queue_capacity = 32
worker_count = 2
submit_timeout_ms = 1000

[dispatchers.webhooks]
max_concurrent = 4
wait_timeout_ms = 200
"#;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::INFO)
    .with_target(false)
    .init();
  info!("--- Executor Registry Example ---");

  let config = ExecutorsConfig::from_toml_str(EXECUTORS).expect("Invalid executors config");
  let registry = ExecutorRegistry::from_config(&config, Handle::current()).expect("Failed to build executors");
  info!("Pools: {:?}, dispatchers: {:?}", registry.pool_names(), registry.dispatcher_names());

  // Request handlers look executors up by name and hand them background work.
  if let Some(emails) = registry.pool("emails") {
    for i in 0..3 {
      emails
        .submit(async move {
          tokio::time::sleep(Duration::from_millis(50)).await;
          info!("Email {} sent.", i);
        })
        .await
        .expect("Failed to queue email");
    }
  }
  if let Some(webhooks) = registry.dispatcher("webhooks") {
    let cancel = CancellationToken::new();
    for i in 0..3 {
      webhooks
        .dispatch(&cancel, async move { info!("Webhook {} delivered.", i) })
        .await
        .expect("Failed to dispatch webhook");
    }
  }

  registry.close_all().await;
  info!("--- Executor Registry Example End ---");
}
