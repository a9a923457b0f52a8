use super::CounterStore;
use crate::error::StoreError;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Local (in-memory) counter store
///
/// Expired entries are dropped lazily when touched, or in bulk by
/// [`LocalCounterStore::purge_expired`].
#[derive(Debug, Clone, Default)]
pub struct LocalCounterStore {
    entries: Arc<DashMap<String, Counter>>,
}

#[derive(Debug, Clone, Copy)]
struct Counter {
    value: i64,
    expires_at: Option<Instant>,
}

impl Counter {
    /// A TTL too large to represent as an `Instant` never expires
    fn new(value: i64, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.and_then(|ttl| Instant::now().checked_add(ttl)),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

impl LocalCounterStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, counter| !counter.is_expired(now));
    }
}

#[async_trait]
impl CounterStore for LocalCounterStore {
    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError> {
        let now = Instant::now();
        let value = match self.entries.get(key) {
            Some(counter) if !counter.is_expired(now) => return Ok(Some(counter.value)),
            Some(_) => None,
            None => return Ok(None),
        };

        // The read guard is released above; removing while holding it would deadlock.
        self.entries.remove_if(key, |_, counter| counter.is_expired(now));
        Ok(value)
    }

    async fn set(&self, key: &str, value: i64, ttl: Option<Duration>) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), Counter::new(value, ttl));
        Ok(())
    }

    async fn add(&self, key: &str, value: i64, ttl: Option<Duration>) -> Result<bool, StoreError> {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_expired(now) {
                    entry.insert(Counter::new(value, ttl));
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(entry) => {
                debug!(key = key, ttl = ?ttl, "Creating counter");
                entry.insert(Counter::new(value, ttl));
                Ok(true)
            }
        }
    }

    async fn incr(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(entry) if entry.get().is_expired(now) => {
                entry.remove();
                Err(StoreError::CounterMissing(key.to_string()))
            }
            Entry::Occupied(mut entry) => {
                let counter = entry.get_mut();
                counter.value += delta;
                Ok(counter.value)
            }
            Entry::Vacant(_) => Err(StoreError::CounterMissing(key.to_string())),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }
}
