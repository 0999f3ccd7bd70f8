mod common;

use bounded_exec::{
  DispatcherConfig, ExecutorError, ExecutorRegistry, ExecutorState, ExecutorsConfig, PoolConfig,
};
use common::{recording_panic_handler, setup_tracing_for_test, ConcurrencyProbe};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

const CONFIG: &str = r#"
[pools.mailer]
queue_capacity = 16
worker_count = 2
submit_timeout_ms = 250

[pools.reports]
queue_capacity = 4
worker_count = 1

[dispatchers.thumbnails]
max_concurrent = 8
wait_timeout_ms = 0
"#;

#[tokio::test]
async fn test_registry_from_toml_config() {
  setup_tracing_for_test();
  let config = ExecutorsConfig::from_toml_str(CONFIG).unwrap();
  let registry = ExecutorRegistry::from_config(&config, Handle::current()).unwrap();

  assert_eq!(registry.pool_names(), vec!["mailer".to_string(), "reports".to_string()]);
  assert_eq!(registry.dispatcher_names(), vec!["thumbnails".to_string()]);

  let mailer = registry.pool("mailer").unwrap();
  assert_eq!(mailer.name(), "mailer");
  assert_eq!(mailer.queue_capacity(), 16);
  assert_eq!(mailer.worker_count(), 2);
  assert_eq!(mailer.submit_timeout(), Duration::from_millis(250));

  let thumbnails = registry.dispatcher("thumbnails").unwrap();
  assert_eq!(thumbnails.max_concurrent(), 8);
  assert_eq!(thumbnails.wait_timeout(), Duration::ZERO);

  assert!(registry.pool("thumbnails").is_none());
  assert!(registry.dispatcher("missing").is_none());

  registry.close_all().await;
}

#[tokio::test]
async fn test_lookups_return_the_same_executor() {
  setup_tracing_for_test();
  let registry = ExecutorRegistry::new(Handle::current());
  let created = registry.create_pool(PoolConfig::new(4, 1).name("shared")).unwrap();
  let looked_up = registry.pool("shared").unwrap();
  assert!(std::sync::Arc::ptr_eq(&created, &looked_up));

  registry.close_all().await;
  assert_eq!(created.state(), ExecutorState::Closed);
}

#[tokio::test]
async fn test_duplicate_names_are_rejected() {
  setup_tracing_for_test();
  let registry = ExecutorRegistry::new(Handle::current());

  registry.create_pool(PoolConfig::new(4, 1).name("jobs")).unwrap();
  let duplicate = registry.create_pool(PoolConfig::new(8, 2).name("jobs"));
  assert_eq!(duplicate.err(), Some(ExecutorError::AlreadyRegistered("jobs".to_string())));
  assert_eq!(registry.pool("jobs").unwrap().queue_capacity(), 4);

  // Pools and dispatchers are named independently.
  registry.create_dispatcher(DispatcherConfig::new(2).name("jobs")).unwrap();
  let duplicate = registry.create_dispatcher(DispatcherConfig::new(2).name("jobs"));
  assert_eq!(duplicate.err(), Some(ExecutorError::AlreadyRegistered("jobs".to_string())));

  registry.close_all().await;
}

#[tokio::test]
async fn test_invalid_config_registers_nothing() {
  setup_tracing_for_test();
  let registry = ExecutorRegistry::new(Handle::current());
  let result = registry.create_dispatcher(DispatcherConfig::new(0).name("broken"));
  assert!(matches!(result, Err(ExecutorError::InvalidConfig(_))));
  assert!(registry.dispatcher("broken").is_none());
}

#[tokio::test]
async fn test_close_all_drains_every_executor() {
  setup_tracing_for_test();
  let (handler, seen) = recording_panic_handler();
  let registry = ExecutorRegistry::with_panic_handler(Handle::current(), handler);
  let pool = registry.create_pool(PoolConfig::new(8, 2).name("pool")).unwrap();
  let dispatcher = registry.create_dispatcher(DispatcherConfig::new(2).name("dispatcher")).unwrap();
  let probe = ConcurrencyProbe::new();
  let cancel = CancellationToken::new();

  for _ in 0..4 {
    pool.submit(probe.task(Duration::from_millis(50))).await.unwrap();
  }
  dispatcher.dispatch(&cancel, probe.task(Duration::from_millis(50))).await.unwrap();
  pool.submit(async { panic!("pool side") }).await.unwrap();
  dispatcher.dispatch(&cancel, async { panic!("dispatcher side") }).await.unwrap();

  registry.close_all().await;

  assert_eq!(probe.completed(), 5);
  assert_eq!(pool.state(), ExecutorState::Closed);
  assert_eq!(dispatcher.state(), ExecutorState::Closed);
  let mut messages = seen.lock().unwrap().clone();
  messages.sort();
  assert_eq!(messages, vec!["dispatcher side".to_string(), "pool side".to_string()]);

  assert_eq!(pool.submit(async {}).await, Err(ExecutorError::Closed));
  assert_eq!(dispatcher.dispatch(&cancel, async {}).await, Err(ExecutorError::Closed));
}
