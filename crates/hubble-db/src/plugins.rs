//! Installed plugin and plugin store repositories.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use hubble_core::{
    Error, InstalledPlugin, PluginRepository, PluginStoreRepository, Privileges, Result,
    StorePair,
};

#[derive(Deserialize)]
struct StoredPrivilege {
    identifier: String,
    #[serde(default)]
    description: String,
}

/// Decode the stored privilege list, dropping identifiers this build does not know.
fn privileges_from_json(value: JsonValue) -> Privileges {
    let stored: Vec<StoredPrivilege> = serde_json::from_value(value).unwrap_or_default();
    Privileges::from_stored(
        stored
            .into_iter()
            .map(|p| (p.identifier, p.description)),
    )
}

/// PostgreSQL implementation of PluginRepository.
#[derive(Clone)]
pub struct PgPluginRepository {
    pool: Pool<Postgres>,
}

impl PgPluginRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PluginRepository for PgPluginRepository {
    async fn find_on_create_plugins_for_entry(
        &self,
        entry_id: i32,
        workspace_public_id: Uuid,
    ) -> Result<Vec<InstalledPlugin>> {
        // Ordered by identifier so every run visits plugins in the same order.
        let rows = sqlx::query(
            "SELECT p.id, p.plugin_identifier, p.name, p.workspace_id, p.version_sha, p.privileges
             FROM installed_plugins p
             JOIN workspaces w ON w.id = p.workspace_id
             JOIN entries e ON e.id = $1
             WHERE w.public_id = $2
               AND 'on_create' = ANY(p.modes)
               AND (e.entry_type = ANY(p.entry_types) OR '*' = ANY(p.entry_types))
             ORDER BY p.plugin_identifier",
        )
        .bind(entry_id)
        .bind(workspace_public_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|row| InstalledPlugin {
                id: row.get("id"),
                identifier: row.get("plugin_identifier"),
                name: row.get("name"),
                workspace_id: row.get("workspace_id"),
                version_sha: row.get("version_sha"),
                privileges: privileges_from_json(row.get("privileges")),
            })
            .collect())
    }
}

/// PostgreSQL implementation of PluginStoreRepository.
#[derive(Clone)]
pub struct PgPluginStoreRepository {
    pool: Pool<Postgres>,
}

impl PgPluginStoreRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PluginStoreRepository for PgPluginStoreRepository {
    async fn get(&self, plugin_id: &str, key: &str) -> Result<Option<String>> {
        let value = sqlx::query_scalar::<_, String>(
            "SELECT value FROM plugin_store WHERE plugin_id = $1 AND key = $2",
        )
        .bind(plugin_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(value)
    }

    async fn set(&self, plugin_id: &str, key: &str, value: &str) -> Result<String> {
        let stored = sqlx::query_scalar::<_, String>(
            "INSERT INTO plugin_store (plugin_id, key, value) VALUES ($1, $2, $3)
             ON CONFLICT (plugin_id, key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()
             RETURNING value",
        )
        .bind(plugin_id)
        .bind(key)
        .bind(value)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(stored)
    }

    async fn delete(&self, plugin_id: &str, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM plugin_store WHERE plugin_id = $1 AND key = $2")
            .bind(plugin_id)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    async fn all(&self, plugin_id: &str) -> Result<Vec<StorePair>> {
        let rows =
            sqlx::query("SELECT key, value FROM plugin_store WHERE plugin_id = $1 ORDER BY key")
                .bind(plugin_id)
                .fetch_all(&self.pool)
                .await
                .map_err(Error::Database)?;
        Ok(rows
            .into_iter()
            .map(|row| StorePair {
                key: row.get("key"),
                value: row.get("value"),
            })
            .collect())
    }

    async fn clear(&self, plugin_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM plugin_store WHERE plugin_id = $1")
            .bind(plugin_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }
}
