//! # hubble-db
//!
//! Storage layer for the hubble processing core.
//!
//! This crate provides:
//! - Connection pool management
//! - Repository implementations for entries, chunks, plugins and TOTP secrets
//! - Chunk embeddings stored with pgvector
//! - Key-value store drivers (PostgreSQL, Redis)
//! - Presigned object store URLs
//!
//! ## Example
//!
//! ```rust,ignore
//! use hubble_db::{Database, EntryRepository};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/hubble").await?;
//!     for id in db.entries.find_queued_ids().await? {
//!         println!("queued: {id}");
//!     }
//!     Ok(())
//! }
//! ```
pub mod entries;
pub mod kv;
pub mod objectstore;
pub mod plugins;
pub mod pool;
pub mod redis_kv;
pub mod totp;

// Test fixtures for integration tests
// Note: Always compiled so integration tests (in tests/) can use DEFAULT_TEST_DATABASE_URL
pub mod test_fixtures;

// Re-export core types
pub use hubble_core::*;

pub use entries::{PgChunkRepository, PgEntryRepository, UNTRACKED_EMBEDDING_ERROR};
pub use kv::PgKvStore;
pub use objectstore::S3Presigner;
pub use plugins::{PgPluginRepository, PgPluginStoreRepository};
pub use pool::{create_pool, create_pool_with_config, PoolConfig};
pub use redis_kv::RedisKvStore;
pub use totp::PgTotpRepository;

/// Combined database context with all repositories.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    pub entries: PgEntryRepository,
    pub chunks: PgChunkRepository,
    /// Plugins installed per workspace.
    pub plugins: PgPluginRepository,
    /// Per-plugin persistent key/value pairs.
    pub plugin_store: PgPluginStoreRepository,
    pub totp: PgTotpRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            entries: PgEntryRepository::new(pool.clone()),
            chunks: PgChunkRepository::new(pool.clone()),
            plugins: PgPluginRepository::new(pool.clone()),
            plugin_store: PgPluginStoreRepository::new(pool.clone()),
            totp: PgTotpRepository::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// A key-value store sharing this database's pool.
    pub fn kv_store(&self) -> PgKvStore {
        PgKvStore::new(self.pool.clone())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }

    /// Close the pool, waiting for checked-out connections to return.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
