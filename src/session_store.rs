//! Session store adapters: Redis for deployments, an in-process map for
//! development and tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::{Client, RedisError};
use tokio::time::Instant;

use crate::authentication::{ExpirationSetter, ValueGetter, ValueSetter};
use crate::error::Result;

/// Redis-backed store; keys expire through Redis' own TTL.
#[derive(Clone)]
pub struct RedisStore {
    connection_manager: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;

        let connection_manager = tokio::time::timeout(
            Duration::from_secs(10),
            ConnectionManager::new(client),
        )
        .await
        .map_err(|_| {
            RedisError::from((redis::ErrorKind::IoError, "timed out connecting to redis"))
        })??;

        let store = Self { connection_manager };
        store.ping().await?;
        tracing::info!("connected to redis");
        Ok(store)
    }

    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection_manager.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl ValueSetter for RedisStore {
    async fn set_value(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.connection_manager.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ValueGetter for RedisStore {
    async fn get_value(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection_manager.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }
}

#[async_trait]
impl ExpirationSetter for RedisStore {
    async fn set_expiration(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.connection_manager.clone();
        // 0 when the key vanished in between; the token simply stops working
        let _: i64 = redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-process store. Expired entries are dropped when read and swept on every write.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn stored(&self) -> usize {
        self.entries.lock().len()
    }
}

#[async_trait]
impl ValueSetter for MemoryStore {
    async fn set_value(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        // abandoned tokens are never read again
        entries.retain(|_, entry| entry.expires_at > now);
        entries.insert(
            key.to_owned(),
            Entry {
                value: value.to_owned(),
                expires_at: now + ttl,
            },
        );
        Ok(())
    }
}

#[async_trait]
impl ValueGetter for MemoryStore {
    async fn get_value(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let live = entries
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.value.clone());
        if live.is_none() {
            entries.remove(key);
        }
        Ok(live)
    }
}

#[async_trait]
impl ExpirationSetter for MemoryStore {
    async fn set_expiration(&self, key: &str, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        if let Some(entry) = self.entries.lock().get_mut(key) {
            if entry.expires_at > now {
                entry.expires_at = now + ttl;
            }
        }
        Ok(())
    }
}
