//! Structured logging field names for hubble.
//!
//! All crates use these constants for structured logging fields so log
//! aggregation can query by the same names across every subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events (startup, shutdown), job completions |
//! | DEBUG | Decision points, skipped work, config choices |
//! | TRACE | Per-item iteration (chunks, host calls) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "db", "jobs", "plugin", "inference", "crypto", "ograph", "server"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "pool", "queue", "runtime", "rotator", "ratelimiter"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "create", "on_create", "embed", "persist"
pub const OPERATION: &str = "op";

/// Origin of a log line emitted on behalf of a plugin.
/// Values: "plugin" (guest log imports), "host_function" (host import failures)
pub const SOURCE: &str = "source";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Internal entry id being processed.
pub const ENTRY_ID: &str = "entry_id";

/// Chunk id being embedded.
pub const CHUNK_ID: &str = "chunk_id";

/// Installed plugin identifier.
pub const PLUGIN_ID: &str = "plugin_id";

/// Human readable plugin name.
pub const PLUGIN_NAME: &str = "plugin_name";

/// Job kind ("entry", "chunk_embedding", "entry_chunk_embedding").
pub const JOB_KIND: &str = "job_kind";

/// Queue pool name ("entries", "embeddings").
pub const POOL: &str = "pool";

/// Privilege required by a host function.
pub const PERM: &str = "perm";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of chunks processed.
pub const CHUNK_COUNT: &str = "chunk_count";

/// Retry attempt number (1-based).
pub const ATTEMPT: &str = "attempt";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
