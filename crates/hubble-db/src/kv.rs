//! PostgreSQL-backed key-value store.
//!
//! Values live in the `kv_store` table. Expired rows are treated as missing
//! on read and swept by [`PgKvStore::purge_expired`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres};
use tracing::debug;

use hubble_core::{Error, KeyValueStore, Result};

#[derive(Clone)]
pub struct PgKvStore {
    pool: Pool<Postgres>,
}

impl PgKvStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Delete every expired row, returning how many were removed.
    pub async fn purge_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM kv_store WHERE expires_at IS NOT NULL AND expires_at <= NOW()")
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        debug!(
            subsystem = "db",
            component = "kv",
            op = "purge",
            removed = result.rows_affected(),
            "Purged expired keys"
        );
        Ok(result.rows_affected())
    }

    async fn upsert(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let expires_at = match ttl {
            Some(ttl) => Some(
                Utc::now()
                    + chrono::Duration::from_std(ttl)
                        .map_err(|e| Error::Kv(format!("ttl out of range: {e}")))?,
            ),
            None => None,
        };
        sqlx::query(
            "INSERT INTO kv_store (key, value, expires_at) VALUES ($1, $2, $3)
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at",
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for PgKvStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        sqlx::query_scalar::<_, Vec<u8>>(
            "SELECT value FROM kv_store
             WHERE key = $1 AND (expires_at IS NULL OR expires_at > NOW())",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?
        .ok_or_else(|| Error::KeyNotFound(key.to_string()))
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.upsert(key, value, None).await
    }

    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        self.upsert(key, value, Some(ttl)).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM kv_store
                           WHERE key = $1 AND (expires_at IS NULL OR expires_at > NOW()))",
        )
        .bind(key)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(exists)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM kv_store WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    /// The pool is shared with the repositories and closed last.
    async fn close(&self) -> Result<()> {
        self.purge_expired().await.map(|_| ())
    }
}
