//! # hubble-core
//!
//! Core types, traits, and abstractions for the hubble processing core.
//!
//! This crate provides the data model, the job envelope, the repository and
//! store traits, configuration, and the rate limiter that other hubble
//! crates depend on.

pub mod config;
pub mod defaults;
pub mod error;
pub mod job;
pub mod kv;
pub mod logging;
pub mod models;
pub mod ratelimit;
pub mod traits;

// Re-export commonly used types at crate root
pub use config::{parse_totp_key, Config, DatabaseConfig, TotpKey};
pub use error::{Error, Result};
pub use job::{ChunkEmbeddingJob, EntryChunkEmbeddingJob, EntryJob, Job};
pub use kv::{Key, MemoryKvStore, Namespace};
pub use models::*;
pub use ratelimit::{Limit, RateLimiter};
pub use traits::*;
