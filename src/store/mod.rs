//! Counter stores
//!
//! A circuit breaker keeps no state of its own: the circuit flag and the
//! failure and request counters live in a [`CounterStore`] shared by every
//! breaker that protects the same resource.
//!
//! - [`LocalCounterStore`]: in-process, TTL-aware, backed by a `DashMap`
//! - [`RedisCounterStore`]: distributed, backed by a Redis connection manager
//!
//! Both guarantee that [`CounterStore::add`] and [`CounterStore::incr`] are
//! atomic per key.

pub mod local;
pub mod lua_scripts;
pub mod redis;

pub use local::LocalCounterStore;
pub use self::redis::RedisCounterStore;

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Atomic named counters with optional per-key expiration
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Read a counter, `None` if absent or expired
    async fn get(&self, key: &str) -> std::result::Result<Option<i64>, StoreError>;

    /// Unconditionally write a counter
    async fn set(
        &self,
        key: &str,
        value: i64,
        ttl: Option<Duration>,
    ) -> std::result::Result<(), StoreError>;

    /// Create a counter if it does not exist; returns true if it was created
    async fn add(
        &self,
        key: &str,
        value: i64,
        ttl: Option<Duration>,
    ) -> std::result::Result<bool, StoreError>;

    /// Atomically increment an existing counter, keeping its expiration
    ///
    /// Fails with [`StoreError::CounterMissing`] if the key is absent.
    async fn incr(&self, key: &str, delta: i64) -> std::result::Result<i64, StoreError>;

    /// Remove a counter; removing an absent key is not an error
    async fn delete(&self, key: &str) -> std::result::Result<(), StoreError>;
}

/// Build the store described by the configuration
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn CounterStore>> {
    match config {
        StoreConfig::Local => {
            info!("Using local counter store");
            Ok(Arc::new(LocalCounterStore::new()))
        }
        StoreConfig::Redis { url, prefix } => {
            info!(url = %url, prefix = %prefix, "Using Redis counter store");
            let store = RedisCounterStore::new(url, prefix.clone()).await?;
            Ok(Arc::new(store))
        }
    }
}
