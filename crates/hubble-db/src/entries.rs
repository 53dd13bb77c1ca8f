//! Entry and chunk repositories.

use std::collections::HashMap;

use async_trait::async_trait;
use pgvector::Vector;
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use tracing::warn;
use uuid::Uuid;

use hubble_core::{
    ChunkEmbeddingUpdate, ChunkRepository, EmbeddingStatus, Entry, EntryMetadata, EntryOwner,
    EntryRelation, EntryRepository, EntryStatus, EntryType, Error, NewChunk, Result,
    UnindexedChunk, UpdateEntry,
};

/// Fallback message stored when a chunk fails without a recorded error.
pub const UNTRACKED_EMBEDDING_ERROR: &str = "an untracked error occurred";

const ENTRY_SELECT: &str = r#"
    SELECT e.id, e.public_id, e.name, e.content, e.text_content, e.version,
           e.entry_type, e.file_id, e.filesize_bytes, e.status, e.queued_at,
           e.created_at, e.metadata,
           u.first_name, u.last_name, u.username,
           c.public_id AS collection_public_id, c.name AS collection_name,
           c.slug AS collection_slug,
           w.public_id AS workspace_public_id, w.name AS workspace_name,
           w.slug AS workspace_slug
    FROM entries e
    JOIN users u ON u.id = e.added_by
    JOIN collections c ON c.id = e.collection_id
    JOIN workspaces w ON w.id = c.workspace_id
"#;

fn entry_from_row(row: &PgRow) -> Result<Entry> {
    let entry_type: EntryType = row.get::<String, _>("entry_type").parse()?;
    let status: EntryStatus = row.get::<String, _>("status").parse()?;
    let metadata = match row.get::<Option<JsonValue>, _>("metadata") {
        Some(value) if !value.is_null() => Some(EntryMetadata::from_json(value, entry_type)?),
        _ => None,
    };

    Ok(Entry {
        id: row.get("id"),
        public_id: row.get("public_id"),
        name: row.get("name"),
        content: row.get("content"),
        text_content: row.get("text_content"),
        version: row.get("version"),
        entry_type,
        file_id: row.get("file_id"),
        filesize_bytes: row.get("filesize_bytes"),
        status,
        queued_at: row.get("queued_at"),
        created_at: row.get("created_at"),
        added_by: EntryOwner {
            first_name: row.get("first_name"),
            last_name: row.get("last_name"),
            username: row.get("username"),
        },
        collection: EntryRelation {
            id: row.get("collection_public_id"),
            name: row.get("collection_name"),
            slug: row.get("collection_slug"),
        },
        workspace: EntryRelation {
            id: row.get("workspace_public_id"),
            name: row.get("workspace_name"),
            slug: row.get("workspace_slug"),
        },
        metadata,
    })
}

/// PostgreSQL implementation of EntryRepository.
#[derive(Clone)]
pub struct PgEntryRepository {
    pool: Pool<Postgres>,
}

impl PgEntryRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntryRepository for PgEntryRepository {
    async fn find_by_id(&self, id: i32) -> Result<Entry> {
        let query = format!("{ENTRY_SELECT} WHERE e.id = $1 AND e.deleted_at IS NULL");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?
            .ok_or(Error::EntryNotFound(id))?;
        entry_from_row(&row)
    }

    async fn find_by_public_id(&self, public_id: Uuid) -> Result<Entry> {
        let query = format!("{ENTRY_SELECT} WHERE e.public_id = $1 AND e.deleted_at IS NULL");
        let row = sqlx::query(&query)
            .bind(public_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?
            .ok_or_else(|| Error::NotFound(format!("entry {public_id}")))?;
        entry_from_row(&row)
    }

    async fn find_queued_ids(&self) -> Result<Vec<i32>> {
        let ids = sqlx::query_scalar::<_, i32>(
            "SELECT id FROM entries WHERE status = 'queued' AND deleted_at IS NULL ORDER BY queued_at",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(ids)
    }

    async fn update_status(&self, id: i32, status: EntryStatus) -> Result<()> {
        sqlx::query("UPDATE entries SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    async fn update_entry(&self, update: UpdateEntry) -> Result<()> {
        let result = sqlx::query(
            "UPDATE entries
             SET name = $2, content = $3, text_content = $4, checksum = $5, updated_at = NOW()
             WHERE public_id = $1 AND deleted_at IS NULL",
        )
        .bind(update.id)
        .bind(update.name.trim())
        .bind(&update.markdown)
        .bind(&update.plain_text)
        .bind(&update.checksum)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("entry {}", update.id)));
        }
        Ok(())
    }
}

/// PostgreSQL implementation of ChunkRepository.
#[derive(Clone)]
pub struct PgChunkRepository {
    pool: Pool<Postgres>,
}

impl PgChunkRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

fn unindexed_from_rows(rows: Vec<PgRow>) -> Vec<UnindexedChunk> {
    rows.into_iter()
        .map(|row| UnindexedChunk {
            id: row.get("id"),
            content: row.get("content"),
        })
        .collect()
}

#[async_trait]
impl ChunkRepository for PgChunkRepository {
    async fn find_unindexed_entry_chunks(
        &self,
        entry_public_id: Uuid,
    ) -> Result<Vec<UnindexedChunk>> {
        let rows = sqlx::query(
            "SELECT ch.id, ch.content
             FROM entry_chunks ch
             JOIN entries e ON e.id = ch.entry_id
             WHERE e.public_id = $1
               AND ch.deleted_at IS NULL
               AND ch.embedding_status IN ('pending', 'failed')
             ORDER BY ch.chunk_index",
        )
        .bind(entry_public_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(unindexed_from_rows(rows))
    }

    async fn find_unindexed_chunks(&self) -> Result<Vec<UnindexedChunk>> {
        let rows = sqlx::query(
            "SELECT id, content
             FROM entry_chunks
             WHERE deleted_at IS NULL AND embedding_status IN ('pending', 'failed')
             ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(unindexed_from_rows(rows))
    }

    async fn can_embed_chunk(&self, id: i32) -> Result<bool> {
        let can = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(
                SELECT 1 FROM entry_chunks
                WHERE id = $1 AND deleted_at IS NULL
                  AND embedding_status IN ('pending', 'failed')
             )",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(can)
    }

    async fn update_embedding_state(&self, update: ChunkEmbeddingUpdate) -> Result<()> {
        match update.status {
            EmbeddingStatus::Done => {
                if update.vector.is_empty() {
                    return Err(Error::InvalidInput("empty vector".to_string()));
                }
                sqlx::query(
                    "UPDATE entry_chunks
                     SET semantic_vector = $2, embedding_status = 'done',
                         last_embedding_error = NULL, updated_at = NOW()
                     WHERE id = $1",
                )
                .bind(update.chunk_id)
                .bind(Vector::from(update.vector))
                .execute(&self.pool)
                .await
                .map_err(Error::Database)?;
            }
            status => {
                let error = match status {
                    EmbeddingStatus::Failed => Some(
                        update
                            .error
                            .unwrap_or_else(|| UNTRACKED_EMBEDDING_ERROR.to_string()),
                    ),
                    _ => None,
                };
                sqlx::query(
                    "UPDATE entry_chunks
                     SET embedding_status = $2, semantic_vector = NULL,
                         last_embedding_error = $3, updated_at = NOW()
                     WHERE id = $1",
                )
                .bind(update.chunk_id)
                .bind(status.as_str())
                .bind(error)
                .execute(&self.pool)
                .await
                .map_err(Error::Database)?;
            }
        }
        Ok(())
    }

    async fn create_chunks(&self, chunks: Vec<NewChunk>) -> Result<u64> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let mut public_ids: Vec<Uuid> = Vec::new();
        for chunk in &chunks {
            if !public_ids.contains(&chunk.entry_id) {
                public_ids.push(chunk.entry_id);
            }
        }

        let resolved: HashMap<Uuid, i32> = sqlx::query(
            "SELECT id, public_id FROM entries WHERE public_id = ANY($1) AND deleted_at IS NULL",
        )
        .bind(&public_ids)
        .fetch_all(&mut *tx)
        .await
        .map_err(Error::Database)?
        .into_iter()
        .map(|row| (row.get("public_id"), row.get("id")))
        .collect();

        let mut created = 0u64;
        for chunk in chunks {
            let Some(entry_id) = resolved.get(&chunk.entry_id) else {
                warn!(
                    subsystem = "db",
                    component = "chunks",
                    entry_public_id = %chunk.entry_id,
                    "Skipping chunk for unknown entry"
                );
                continue;
            };
            let min_version = if chunk.min_version == 0 {
                1
            } else {
                chunk.min_version
            };
            let result = sqlx::query(
                "INSERT INTO entry_chunks (entry_id, chunk_index, min_version, content, language)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (entry_id, chunk_index, min_version)
                 DO UPDATE SET content = EXCLUDED.content, language = EXCLUDED.language,
                               embedding_status = 'pending', semantic_vector = NULL,
                               updated_at = NOW()",
            )
            .bind(entry_id)
            .bind(chunk.index)
            .bind(min_version)
            .bind(&chunk.content)
            .bind(&chunk.language)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
            created += result.rows_affected();
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(created)
    }
}
