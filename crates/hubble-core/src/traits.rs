//! Core traits for hubble abstractions.
//!
//! These traits define the interfaces that concrete implementations
//! must satisfy, enabling pluggable backends and testability.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::job::Job;
use crate::models::*;

// =============================================================================
// REPOSITORY TRAITS
// =============================================================================

/// Repository for entries.
#[async_trait]
pub trait EntryRepository: Send + Sync {
    /// Load an entry by internal id.
    async fn find_by_id(&self, id: i32) -> Result<Entry>;

    /// Load an entry by public id.
    async fn find_by_public_id(&self, public_id: Uuid) -> Result<Entry>;

    /// Internal ids of every entry still marked `queued`.
    async fn find_queued_ids(&self) -> Result<Vec<i32>>;

    /// Set the queue status of an entry.
    async fn update_status(&self, id: i32, status: EntryStatus) -> Result<()>;

    /// Rewrite the name and content of an entry.
    async fn update_entry(&self, update: UpdateEntry) -> Result<()>;
}

/// Repository for entry chunks and their embedding state.
#[async_trait]
pub trait ChunkRepository: Send + Sync {
    /// Unindexed chunks belonging to one entry.
    async fn find_unindexed_entry_chunks(&self, entry_public_id: Uuid)
        -> Result<Vec<UnindexedChunk>>;

    /// Every unindexed chunk (status pending or failed).
    async fn find_unindexed_chunks(&self) -> Result<Vec<UnindexedChunk>>;

    /// Whether the chunk still needs an embedding.
    async fn can_embed_chunk(&self, id: i32) -> Result<bool>;

    /// Persist a semantic vector state transition.
    async fn update_embedding_state(&self, update: ChunkEmbeddingUpdate) -> Result<()>;

    /// Insert chunks in one transaction, returning how many were written.
    async fn create_chunks(&self, chunks: Vec<NewChunk>) -> Result<u64>;
}

/// Repository for installed plugins.
#[async_trait]
pub trait PluginRepository: Send + Sync {
    /// Plugins that run `on_create` for this entry in the given workspace.
    async fn find_on_create_plugins_for_entry(
        &self,
        entry_id: i32,
        workspace_public_id: Uuid,
    ) -> Result<Vec<InstalledPlugin>>;
}

/// Per-plugin private key/value storage.
#[async_trait]
pub trait PluginStoreRepository: Send + Sync {
    async fn get(&self, plugin_id: &str, key: &str) -> Result<Option<String>>;

    /// Upsert and return the stored value.
    async fn set(&self, plugin_id: &str, key: &str, value: &str) -> Result<String>;

    async fn delete(&self, plugin_id: &str, key: &str) -> Result<()>;

    async fn all(&self, plugin_id: &str) -> Result<Vec<StorePair>>;

    async fn clear(&self, plugin_id: &str) -> Result<()>;
}

/// Repository for encrypted TOTP secrets.
#[async_trait]
pub trait TotpRepository: Send + Sync {
    /// Secrets sealed with a key older than `latest_version`.
    async fn find_outdated_secrets(&self, latest_version: i16) -> Result<Vec<TotpSecret>>;

    /// Write hashes and versions for all secrets in a single transaction.
    async fn batch_update_secrets(&self, secrets: &[TotpSecret]) -> Result<()>;
}

// =============================================================================
// KEY-VALUE STORE
// =============================================================================

/// Byte-oriented key-value store with optional expiry.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Fetch a value; a missing or expired key is `Error::KeyNotFound`.
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    async fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Release connections held by the store.
    async fn close(&self) -> Result<()>;
}

/// JSON helpers available on every [`KeyValueStore`].
#[async_trait]
pub trait KeyValueStoreExt: KeyValueStore {
    async fn get_json<T: DeserializeOwned + Send>(&self, key: &str) -> Result<T> {
        let raw = self.get(key).await?;
        Ok(serde_json::from_slice(&raw)?)
    }

    async fn set_json<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_vec(value)?;
        self.set(key, &raw).await
    }

    async fn set_json_with_ttl<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<()> {
        let raw = serde_json::to_vec(value)?;
        self.set_with_ttl(key, &raw, ttl).await
    }
}

impl<S: KeyValueStore + ?Sized> KeyValueStoreExt for S {}

// =============================================================================
// EXTERNAL SERVICES
// =============================================================================

/// Object storage for uploaded entry files.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// A time-limited GET URL for `key` in the entries bucket.
    async fn presigned_get_url(&self, key: &str, expiry: Duration) -> Result<String>;

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Produces embedding vectors for text.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Embed a single text into a fixed-dimension vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Configured vector dimension.
    fn dimension(&self) -> usize;
}

/// Accepts jobs for asynchronous processing.
///
/// The queue implements this; plugin host functions and the reconcile cron
/// hold it as `Arc<dyn JobSink>` so they do not depend on the queue itself.
#[async_trait]
pub trait JobSink: Send + Sync {
    async fn add(&self, job: Job) -> Result<()>;

    async fn add_many(&self, jobs: Vec<Job>) -> Result<()> {
        for job in jobs {
            self.add(job).await?;
        }
        Ok(())
    }
}

/// Whether an error is the KV store's missing-key signal.
pub fn is_key_not_found(err: &Error) -> bool {
    matches!(err, Error::KeyNotFound(_))
}
