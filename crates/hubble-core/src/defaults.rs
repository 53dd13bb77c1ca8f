//! Centralized default constants for hubble.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates reference these constants instead of defining their own magic
//! numbers.

use std::time::Duration;

// =============================================================================
// JOB QUEUE
// =============================================================================

/// Worker width of the entry-processing pool.
pub const ENTRY_POOL_WIDTH: usize = 15;

/// Worker width of the chunk-embedding pool.
pub const EMBEDDING_POOL_WIDTH: usize = 10;

/// Database connections: both worker pools plus the reconcile cron and the
/// secret rotator.
pub const DB_MAX_CONNECTIONS: u32 = 30;

/// How long to wait for a database connection, in seconds.
pub const DB_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Maximum retry count per job before it is dropped.
pub const JOB_MAX_RETRIES: u32 = 3;

/// How long `JobQueue::close` waits for in-flight jobs.
pub const QUEUE_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Base retry delay for entry jobs.
pub const ENTRY_RETRY_DELAY: Duration = Duration::from_secs(120);
/// Lower retry bound for entry jobs.
pub const ENTRY_RETRY_MIN: Duration = Duration::from_secs(5 * 60);
/// Upper retry bound for entry jobs.
pub const ENTRY_RETRY_MAX: Duration = Duration::from_secs(20 * 60);
/// Timeout for a single entry job attempt.
pub const ENTRY_JOB_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Base retry delay for embedding jobs.
pub const EMBEDDING_RETRY_DELAY: Duration = Duration::from_secs(120);
/// Lower retry bound for embedding jobs.
pub const EMBEDDING_RETRY_MIN: Duration = Duration::from_secs(2 * 60);
/// Upper retry bound for embedding jobs.
pub const EMBEDDING_RETRY_MAX: Duration = Duration::from_secs(10 * 60);
/// Timeout for a single embedding job attempt.
pub const EMBEDDING_JOB_TIMEOUT: Duration = Duration::from_secs(2 * 60);

/// Interval between reconciliation passes over unindexed chunks.
pub const RECONCILE_INTERVAL: Duration = Duration::from_secs(30 * 60);

// =============================================================================
// PLUGINS
// =============================================================================

/// Default plugins directory.
pub const PLUGINS_DIR: &str = ".plugins";

/// Deadline for a single `on_create` invocation.
pub const PLUGIN_CALL_TIMEOUT: Duration = Duration::from_secs(45);

/// Timeout for the `transform_url_to_markdown` host function fetch.
pub const PLUGIN_FETCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Largest buffer `crypto_rand` will hand to a guest.
pub const CRYPTO_RAND_MAX_BYTES: usize = 1024;

/// Sentinel returned by `store_get` when the key is absent.
pub const STORE_NOT_FOUND: &str = "__NOT_FOUND_0x0000__";

/// Lifetime of presigned attachment URLs handed to plugins.
pub const PRESIGNED_URL_EXPIRY: Duration = Duration::from_secs(5 * 60);

/// Object store bucket holding uploaded entry files.
pub const ENTRIES_BUCKET: &str = "entries";

// =============================================================================
// CHUNKING
// =============================================================================

/// Maximum characters per chunk for overlap chunking.
pub const CHUNK_SIZE: usize = 1000;

/// Overlap characters between adjacent chunks.
pub const CHUNK_OVERLAP: usize = 75;

// =============================================================================
// EMBEDDING
// =============================================================================

/// Default embedding vector dimension.
pub const EMBED_DIMENSION: usize = 768;

/// Timeout for embedding requests in seconds.
pub const EMBED_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// OPENGRAPH
// =============================================================================

/// Client timeout for metadata fetches.
pub const OGRAPH_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum redirects followed when fetching a page.
pub const OGRAPH_MAX_REDIRECTS: usize = 5;

/// Desktop browser user agent used for page fetches.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4.1 Safari/605.1.15";

/// Lifetime of cached link metadata.
pub const LINK_METADATA_TTL: Duration = Duration::from_secs(24 * 60 * 60);

// =============================================================================
// SECRETS
// =============================================================================

/// Number of secrets re-encrypted per rotation worker.
pub const ROTATION_CHUNK_SIZE: usize = 8;

/// Minimum length of the secret part of a TOTP key.
pub const TOTP_SECRET_MIN_LEN: usize = 12;

// =============================================================================
// RATE LIMITING
// =============================================================================

/// Scope under which the rate limiter snapshots its state.
pub const RATE_LIMIT_SCOPE: &str = "app";

/// Action key consulted when an action has no limit of its own.
pub const RATE_LIMIT_WILDCARD: &str = "*";

/// Requests allowed per interval for the wildcard limit.
pub const RATE_LIMIT_DEFAULT_MAX: u32 = 75;

/// Interval of the wildcard limit.
pub const RATE_LIMIT_DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

// =============================================================================
// SERVER
// =============================================================================

/// Default HTTP server port.
pub const SERVER_PORT: u16 = 3288;

/// Default semantic search threshold (percent).
pub const SEARCH_THRESHOLD: u8 = 30;
