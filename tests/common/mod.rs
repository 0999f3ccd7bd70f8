#![allow(dead_code)]

use bounded_exec::{PanicHandler, TaskPanic};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

// Helper to initialize tracing for tests. Every test calls it; `Once` keeps it to one init per binary.
pub fn setup_tracing_for_test() {
  use std::sync::Once;
  use tracing_subscriber::{fmt, EnvFilter};
  static TRACING_INIT: Once = Once::new();

  TRACING_INIT.call_once(|| {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,bounded_exec=trace"));

    fmt::Subscriber::builder()
      .with_env_filter(filter)
      .with_test_writer()
      .try_init()
      .ok();
  });
}

/// Records how many probe tasks run at the same time.
#[derive(Default)]
pub struct ConcurrencyProbe {
  current: AtomicUsize,
  peak: AtomicUsize,
  completed: AtomicUsize,
}

impl ConcurrencyProbe {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn task(self: &Arc<Self>, hold: Duration) -> impl Future<Output = ()> + Send + 'static {
    let probe = self.clone();
    async move {
      let now_running = probe.current.fetch_add(1, Ordering::SeqCst) + 1;
      probe.peak.fetch_max(now_running, Ordering::SeqCst);
      sleep(hold).await;
      probe.current.fetch_sub(1, Ordering::SeqCst);
      probe.completed.fetch_add(1, Ordering::SeqCst);
    }
  }

  pub fn peak(&self) -> usize {
    self.peak.load(Ordering::SeqCst)
  }

  pub fn running(&self) -> usize {
    self.current.load(Ordering::SeqCst)
  }

  pub fn completed(&self) -> usize {
    self.completed.load(Ordering::SeqCst)
  }
}

/// A panic handler that keeps the message of every panic it receives.
pub fn recording_panic_handler() -> (PanicHandler, Arc<Mutex<Vec<String>>>) {
  let seen = Arc::new(Mutex::new(Vec::new()));
  let sink = seen.clone();
  let handler: PanicHandler = Arc::new(move |panic: TaskPanic| {
    let message = panic.message().unwrap_or("<non-string payload>").to_string();
    tracing::info!("Test panic handler received: {}", message);
    sink.lock().unwrap().push(message);
  });
  (handler, seen)
}

/// Polls `condition` until it holds, failing the test after five seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
  tokio::time::timeout(Duration::from_secs(5), async {
    while !condition() {
      sleep(Duration::from_millis(5)).await;
    }
  })
  .await
  .expect("Condition was not reached in time");
}
