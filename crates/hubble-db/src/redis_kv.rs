//! Redis-backed key-value store.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::RwLock;
use tracing::info;

use hubble_core::{Error, KeyValueStore, Result};

pub struct RedisKvStore {
    /// `None` once closed.
    connection: RwLock<Option<ConnectionManager>>,
    prefix: String,
}

fn redis_err(e: redis::RedisError) -> Error {
    Error::Kv(e.to_string())
}

impl RedisKvStore {
    /// Connect to `url`; every key is stored under `hubble:`.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(redis_err)?;
        let connection = ConnectionManager::new(client).await.map_err(redis_err)?;
        info!(
            subsystem = "db",
            component = "redis_kv",
            url = %url.replace(|c: char| c.is_ascii_alphanumeric(), "*"),
            "Redis key-value store connected"
        );
        Ok(Self {
            connection: RwLock::new(Some(connection)),
            prefix: "hubble:".to_string(),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    async fn conn(&self) -> Result<ConnectionManager> {
        self.connection
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::Kv("redis store is closed".to_string()))
    }
}

#[async_trait]
impl KeyValueStore for RedisKvStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let mut conn = self.conn().await?;
        let value: Option<Vec<u8>> = conn.get(self.key(key)).await.map_err(redis_err)?;
        value.ok_or_else(|| Error::KeyNotFound(key.to_string()))
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.set::<_, _, ()>(self.key(key), value)
            .await
            .map_err(redis_err)
    }

    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.set_ex::<_, _, ()>(self.key(key), value, ttl.as_secs().max(1))
            .await
            .map_err(redis_err)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        conn.exists(self.key(key)).await.map_err(redis_err)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.del::<_, ()>(self.key(key)).await.map_err(redis_err)
    }

    async fn close(&self) -> Result<()> {
        self.connection.write().await.take();
        Ok(())
    }
}
