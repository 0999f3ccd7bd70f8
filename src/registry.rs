//! Named executors created once and held by the caller.
//!
//! Executors are looked up by an explicit name chosen at creation, never by the
//! identity of the code that submits to them. A registry is an ordinary value;
//! there is no process-wide instance.

use crate::config::{DispatcherConfig, ExecutorsConfig, PoolConfig};
use crate::dispatcher::Dispatcher;
use crate::error::ExecutorError;
use crate::invoker::{default_panic_handler, PanicHandler};
use crate::pool::WorkerPool;

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use tokio::runtime::Handle as TokioHandle;
use tracing::info;

pub struct ExecutorRegistry {
  pools: DashMap<String, Arc<WorkerPool>>,
  dispatchers: DashMap<String, Arc<Dispatcher>>,
  tokio_handle: TokioHandle,
  panic_handler: PanicHandler,
}

impl ExecutorRegistry {
  pub fn new(tokio_handle: TokioHandle) -> Self {
    Self::with_panic_handler(tokio_handle, default_panic_handler())
  }

  /// Creates an empty registry whose executors all report panics to `panic_handler`.
  pub fn with_panic_handler(tokio_handle: TokioHandle, panic_handler: PanicHandler) -> Self {
    Self {
      pools: DashMap::new(),
      dispatchers: DashMap::new(),
      tokio_handle,
      panic_handler,
    }
  }

  /// Builds every executor described by `config`.
  pub fn from_config(config: &ExecutorsConfig, tokio_handle: TokioHandle) -> Result<Self, ExecutorError> {
    let registry = Self::new(tokio_handle);
    registry.extend_from_config(config)?;
    Ok(registry)
  }

  pub fn extend_from_config(&self, config: &ExecutorsConfig) -> Result<(), ExecutorError> {
    config.validate()?;
    for pool in config.pools.values() {
      self.create_pool(pool.clone())?;
    }
    for dispatcher in config.dispatchers.values() {
      self.create_dispatcher(dispatcher.clone())?;
    }
    Ok(())
  }

  /// Creates and registers a pool under `config.name`.
  ///
  /// # Errors
  /// `AlreadyRegistered` if a pool with that name exists, `InvalidConfig` if the
  /// configuration does not validate.
  pub fn create_pool(&self, config: PoolConfig) -> Result<Arc<WorkerPool>, ExecutorError> {
    match self.pools.entry(config.name.clone()) {
      Entry::Occupied(entry) => Err(ExecutorError::AlreadyRegistered(entry.key().clone())),
      Entry::Vacant(entry) => {
        let pool = WorkerPool::with_panic_handler(config, self.tokio_handle.clone(), self.panic_handler.clone())?;
        entry.insert(pool.clone());
        Ok(pool)
      }
    }
  }

  /// Creates and registers a dispatcher under `config.name`.
  pub fn create_dispatcher(&self, config: DispatcherConfig) -> Result<Arc<Dispatcher>, ExecutorError> {
    match self.dispatchers.entry(config.name.clone()) {
      Entry::Occupied(entry) => Err(ExecutorError::AlreadyRegistered(entry.key().clone())),
      Entry::Vacant(entry) => {
        let dispatcher =
          Dispatcher::with_panic_handler(config, self.tokio_handle.clone(), self.panic_handler.clone())?;
        entry.insert(dispatcher.clone());
        Ok(dispatcher)
      }
    }
  }

  pub fn pool(&self, name: &str) -> Option<Arc<WorkerPool>> {
    self.pools.get(name).map(|entry| entry.value().clone())
  }

  pub fn dispatcher(&self, name: &str) -> Option<Arc<Dispatcher>> {
    self.dispatchers.get(name).map(|entry| entry.value().clone())
  }

  /// Names of all registered pools, sorted.
  pub fn pool_names(&self) -> Vec<String> {
    let mut names: Vec<String> = self.pools.iter().map(|entry| entry.key().clone()).collect();
    names.sort();
    names
  }

  /// Names of all registered dispatchers, sorted.
  pub fn dispatcher_names(&self) -> Vec<String> {
    let mut names: Vec<String> = self.dispatchers.iter().map(|entry| entry.key().clone()).collect();
    names.sort();
    names
  }

  /// Closes every registered executor concurrently and waits for all of them to drain.
  /// The executors stay registered, in the `Closed` state.
  pub async fn close_all(&self) {
    let pools: Vec<Arc<WorkerPool>> = self.pools.iter().map(|entry| entry.value().clone()).collect();
    let dispatchers: Vec<Arc<Dispatcher>> = self.dispatchers.iter().map(|entry| entry.value().clone()).collect();
    info!(
      pools = pools.len(),
      dispatchers = dispatchers.len(),
      "Closing all registered executors."
    );

    futures::join!(
      join_all(pools.iter().map(|pool| pool.close())),
      join_all(dispatchers.iter().map(|dispatcher| dispatcher.close())),
    );
    info!("All registered executors closed.");
  }
}
