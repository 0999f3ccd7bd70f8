//! Construction parameters for the executors.
//!
//! Both executor kinds validate their configuration when constructed and refuse
//! to start with a zero capacity. Timeouts of zero are valid and mean "do not
//! wait": a saturated executor rejects immediately.

use crate::error::ExecutorError;

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Semaphore;

pub const DEFAULT_SUBMIT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_CONCURRENT: usize = 1000;
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_millis(500);

const DEFAULT_POOL_NAME: &str = "worker_pool";
const DEFAULT_DISPATCHER_NAME: &str = "dispatcher";

/// Largest accepted `queue_capacity` or `max_concurrent`. Both are backed by a semaphore.
pub const MAX_CAPACITY: usize = Semaphore::MAX_PERMITS;

/// Configuration of a [`WorkerPool`](crate::WorkerPool).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolConfig {
  #[serde(default = "default_pool_name")]
  pub name: String,
  /// Number of tasks that may wait in the queue.
  pub queue_capacity: usize,
  /// Number of long-lived workers, and thus the maximum number of running tasks.
  pub worker_count: usize,
  /// How long `submit` waits for queue space before failing.
  ///
  /// Zero does not fall back to [`DEFAULT_SUBMIT_TIMEOUT`]: it means "never
  /// wait", and `submit` on a full queue fails with `Saturated` at once.
  #[serde(default = "default_submit_timeout", rename = "submit_timeout_ms", with = "duration_ms")]
  pub submit_timeout: Duration,
}

impl PoolConfig {
  pub fn new(queue_capacity: usize, worker_count: usize) -> Self {
    Self {
      name: default_pool_name(),
      queue_capacity,
      worker_count,
      submit_timeout: DEFAULT_SUBMIT_TIMEOUT,
    }
  }

  pub fn name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }

  /// Sets the submit timeout. `Duration::ZERO` disables waiting instead of
  /// restoring the 5s default.
  pub fn submit_timeout(mut self, submit_timeout: Duration) -> Self {
    self.submit_timeout = submit_timeout;
    self
  }

  pub fn validate(&self) -> Result<(), ExecutorError> {
    if self.queue_capacity == 0 {
      return Err(ExecutorError::InvalidConfig(format!(
        "pool '{}': queue_capacity must be greater than 0",
        self.name
      )));
    }
    if self.queue_capacity > MAX_CAPACITY {
      return Err(ExecutorError::InvalidConfig(format!(
        "pool '{}': queue_capacity {} exceeds the maximum of {}",
        self.name, self.queue_capacity, MAX_CAPACITY
      )));
    }
    if self.worker_count == 0 {
      return Err(ExecutorError::InvalidConfig(format!(
        "pool '{}': worker_count must be greater than 0",
        self.name
      )));
    }
    Ok(())
  }
}

/// Configuration of a [`Dispatcher`](crate::Dispatcher).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatcherConfig {
  pub name: String,
  /// Maximum number of dispatched tasks running at once.
  pub max_concurrent: usize,
  /// How long `dispatch` waits for a permit once saturated.
  #[serde(rename = "wait_timeout_ms", with = "duration_ms")]
  pub wait_timeout: Duration,
}

impl Default for DispatcherConfig {
  fn default() -> Self {
    Self {
      name: DEFAULT_DISPATCHER_NAME.to_string(),
      max_concurrent: DEFAULT_MAX_CONCURRENT,
      wait_timeout: DEFAULT_WAIT_TIMEOUT,
    }
  }
}

impl DispatcherConfig {
  pub fn new(max_concurrent: usize) -> Self {
    Self {
      max_concurrent,
      ..Self::default()
    }
  }

  pub fn name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }

  pub fn wait_timeout(mut self, wait_timeout: Duration) -> Self {
    self.wait_timeout = wait_timeout;
    self
  }

  pub fn validate(&self) -> Result<(), ExecutorError> {
    if self.max_concurrent == 0 {
      return Err(ExecutorError::InvalidConfig(format!(
        "dispatcher '{}': max_concurrent must be greater than 0",
        self.name
      )));
    }
    if self.max_concurrent > MAX_CAPACITY {
      return Err(ExecutorError::InvalidConfig(format!(
        "dispatcher '{}': max_concurrent {} exceeds the maximum of {}",
        self.name, self.max_concurrent, MAX_CAPACITY
      )));
    }
    Ok(())
  }
}

/// A set of named executors, typically loaded from a TOML file:
///
/// ```toml
/// [pools.mailer]
/// queue_capacity = 64
/// worker_count = 4
/// submit_timeout_ms = 250
///
/// [dispatchers.thumbnails]
/// max_concurrent = 16
/// wait_timeout_ms = 0
/// ```
///
/// The table key is the executor name and overrides any `name` field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutorsConfig {
  pub pools: BTreeMap<String, PoolConfig>,
  pub dispatchers: BTreeMap<String, DispatcherConfig>,
}

impl ExecutorsConfig {
  pub fn from_toml_str(s: &str) -> Result<Self, ExecutorError> {
    let mut config: ExecutorsConfig =
      toml::from_str(s).map_err(|e| ExecutorError::InvalidConfig(format!("failed to parse executors config: {e}")))?;
    for (name, pool) in config.pools.iter_mut() {
      pool.name = name.clone();
    }
    for (name, dispatcher) in config.dispatchers.iter_mut() {
      dispatcher.name = name.clone();
    }
    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<(), ExecutorError> {
    self.pools.values().try_for_each(PoolConfig::validate)?;
    self.dispatchers.values().try_for_each(DispatcherConfig::validate)
  }
}

fn default_pool_name() -> String {
  DEFAULT_POOL_NAME.to_string()
}

fn default_submit_timeout() -> Duration {
  DEFAULT_SUBMIT_TIMEOUT
}

mod duration_ms {
  use serde::{Deserialize, Deserializer};
  use std::time::Duration;

  pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_millis)
  }
}
