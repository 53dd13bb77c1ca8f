//! # hubble-jobs
//!
//! Background processing for hubble.
//!
//! This crate provides:
//! - A job queue with an entries pool and an embeddings pool
//! - Retry with clamped exponential backoff and per-job timeouts
//! - The entry handler, which runs `on_create` plugins
//! - The embedding handler, which stores chunk vectors
//! - A cron that re-queues unindexed chunks
//!
//! ## Example
//!
//! ```ignore
//! use hubble_jobs::{JobQueue, QueueConfig};
//!
//! let queue = Arc::new(JobQueue::new(
//!     QueueConfig::default(),
//!     entry_handler,
//!     Some(embedding_handler),
//!     entries,
//!     chunks,
//! ));
//! queue.load().await?;
//! queue.start();
//!
//! queue.enqueue(Job::Entry(EntryJob { entry_id: 42 })).await?;
//!
//! queue.close().await;
//! ```

pub mod embedding_handler;
pub mod entry_handler;
pub mod handler;
pub mod queue;
pub mod reconcile;
pub mod worker;

pub use embedding_handler::EmbeddingHandler;
pub use entry_handler::{EntryHandler, PluginExecutor};
pub use handler::{JobHandler, JobResult, RetryPolicy};
pub use queue::{JobQueue, QueueConfig};
pub use reconcile::ReconcileCron;
pub use worker::WorkerPool;
