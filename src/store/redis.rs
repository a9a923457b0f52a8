use super::lua_scripts::INCR_IF_EXISTS_SCRIPT;
use super::CounterStore;
use crate::error::StoreError;
use async_trait::async_trait;
use redis::{aio::ConnectionManager, Script};
use std::time::Duration;
use tracing::{debug, error};

/// Redis-backed distributed counter store
///
/// Every breaker process pointing at the same Redis (and prefix) shares one
/// logical circuit per rule.
#[derive(Clone)]
pub struct RedisCounterStore {
    /// Redis connection manager
    connection: ConnectionManager,
    /// Prefix prepended to every key
    prefix: String,
}

impl RedisCounterStore {
    /// Connect to Redis
    pub async fn new(redis_url: &str, prefix: String) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        let connection = ConnectionManager::new(client).await?;

        Ok(Self { connection, prefix })
    }

    /// Test Redis connection
    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        redis::cmd("PING")
            .query_async::<_, ()>(&mut connection)
            .await?;
        Ok(())
    }

    fn redis_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

/// Largest `PX` Redis accepts once added to the current time
const MAX_TTL_MILLIS: u64 = (i64::MAX / 2) as u64;

/// Expiration in milliseconds; Redis rejects a zero or overflowing `PX`
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis())
        .unwrap_or(MAX_TTL_MILLIS)
        .clamp(1, MAX_TTL_MILLIS)
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError> {
        let mut connection = self.connection.clone();
        let value = redis::cmd("GET")
            .arg(self.redis_key(key))
            .query_async::<_, Option<String>>(&mut connection)
            .await?;

        value
            .map(|raw| {
                raw.parse::<i64>().map_err(|_| StoreError::InvalidValue {
                    key: key.to_string(),
                    value: raw,
                })
            })
            .transpose()
    }

    async fn set(&self, key: &str, value: i64, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.redis_key(key)).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }

        cmd.query_async::<_, ()>(&mut connection).await?;
        Ok(())
    }

    async fn add(&self, key: &str, value: i64, ttl: Option<Duration>) -> Result<bool, StoreError> {
        let mut connection = self.connection.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.redis_key(key)).arg(value).arg("NX");
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }

        let reply = cmd.query_async::<_, Option<String>>(&mut connection).await?;
        let created = reply.is_some();
        if created {
            debug!(key = key, ttl = ?ttl, "Created counter in Redis");
        }
        Ok(created)
    }

    async fn incr(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let mut connection = self.connection.clone();
        let script = Script::new(INCR_IF_EXISTS_SCRIPT);

        match script
            .key(self.redis_key(key))
            .arg(delta)
            .invoke_async::<_, Option<i64>>(&mut connection)
            .await
        {
            Ok(Some(total)) => Ok(total),
            Ok(None) => Err(StoreError::CounterMissing(key.to_string())),
            Err(e) => {
                error!(key = key, error = %e, "Redis error during counter increment");
                Err(e.into())
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        redis::cmd("DEL")
            .arg(self.redis_key(key))
            .query_async::<_, ()>(&mut connection)
            .await?;
        Ok(())
    }
}
