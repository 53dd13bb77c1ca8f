//! The job queue: an entries pool and an optional embeddings pool.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use hubble_core::defaults::{EMBEDDING_POOL_WIDTH, ENTRY_POOL_WIDTH, QUEUE_DRAIN_TIMEOUT};
use hubble_core::{
    ChunkEmbeddingJob, ChunkRepository, EntryChunkEmbeddingJob, EntryJob, EntryRepository, Job,
    JobSink, Result,
};

use crate::handler::{JobHandler, RetryPolicy};
use crate::worker::WorkerPool;

/// Pool sizing and retry policies.
#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    pub entry_width: usize,
    pub embedding_width: usize,
    pub entry_policy: RetryPolicy,
    pub embedding_policy: RetryPolicy,
    /// Bound on how long `close` waits for in-flight jobs.
    pub drain_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            entry_width: ENTRY_POOL_WIDTH,
            embedding_width: EMBEDDING_POOL_WIDTH,
            entry_policy: RetryPolicy::entries(),
            embedding_policy: RetryPolicy::embeddings(),
            drain_timeout: QUEUE_DRAIN_TIMEOUT,
        }
    }
}

/// Dispatches entry and embedding jobs to their pools.
///
/// Without an embedding handler, embedding jobs are accepted and dropped.
pub struct JobQueue {
    entries: WorkerPool<EntryJob>,
    embeddings: Option<WorkerPool<ChunkEmbeddingJob>>,
    entry_repo: Arc<dyn EntryRepository>,
    chunk_repo: Arc<dyn ChunkRepository>,
    drain_timeout: Duration,
}

impl JobQueue {
    pub fn new(
        config: QueueConfig,
        entry_handler: Arc<dyn JobHandler<EntryJob>>,
        embedding_handler: Option<Arc<dyn JobHandler<ChunkEmbeddingJob>>>,
        entry_repo: Arc<dyn EntryRepository>,
        chunk_repo: Arc<dyn ChunkRepository>,
    ) -> Self {
        let entries = WorkerPool::new(
            "entries",
            config.entry_width,
            config.entry_policy,
            entry_handler,
        );
        let embeddings = embedding_handler.map(|handler| {
            WorkerPool::new(
                "embeddings",
                config.embedding_width,
                config.embedding_policy,
                handler,
            )
        });
        Self {
            entries,
            embeddings,
            entry_repo,
            chunk_repo,
            drain_timeout: config.drain_timeout,
        }
    }

    pub fn embeddings_enabled(&self) -> bool {
        self.embeddings.is_some()
    }

    /// Queue a job, fanning out entry-chunk jobs to one embedding job per
    /// unindexed chunk.
    pub async fn enqueue(&self, job: Job) -> Result<()> {
        match job {
            Job::Entry(job) => self.entries.push(job),
            Job::ChunkEmbedding(job) => self.push_embedding(job),
            Job::EntryChunkEmbedding(job) => self.fan_out(job).await,
        }
    }

    /// Queue a job from its JSON envelope.
    pub async fn enqueue_encoded(&self, bytes: &[u8]) -> Result<()> {
        self.enqueue(Job::decode(bytes)?).await
    }

    fn push_embedding(&self, job: ChunkEmbeddingJob) -> Result<()> {
        match &self.embeddings {
            Some(pool) => pool.push(job),
            None => {
                debug!(
                    subsystem = "jobs",
                    chunk_id = job.id,
                    "Embeddings disabled, dropping job"
                );
                Ok(())
            }
        }
    }

    async fn fan_out(&self, job: EntryChunkEmbeddingJob) -> Result<()> {
        if self.embeddings.is_none() {
            debug!(
                subsystem = "jobs",
                entries = job.entries.len(),
                "Embeddings disabled, dropping fan-out"
            );
            return Ok(());
        }

        let mut seen_entries = HashSet::new();
        let mut seen_chunks = HashSet::new();
        let mut queued = 0usize;
        for entry_id in job.entries {
            if !seen_entries.insert(entry_id) {
                continue;
            }
            for chunk in self.chunk_repo.find_unindexed_entry_chunks(entry_id).await? {
                if !seen_chunks.insert(chunk.id) {
                    continue;
                }
                self.push_embedding(ChunkEmbeddingJob {
                    id: chunk.id,
                    content: chunk.content,
                })?;
                queued += 1;
            }
        }

        debug!(
            subsystem = "jobs",
            entries = seen_entries.len(),
            chunks = queued,
            "Fanned out chunk embedding jobs"
        );
        Ok(())
    }

    /// Re-queue work persisted as pending: queued entries and, when
    /// embeddings are enabled, unindexed chunks.
    pub async fn load(&self) -> Result<()> {
        let entry_ids = self.entry_repo.find_queued_ids().await?;
        for &entry_id in &entry_ids {
            self.entries.push(EntryJob { entry_id })?;
        }

        let mut chunks = 0usize;
        if self.embeddings.is_some() {
            for chunk in self.chunk_repo.find_unindexed_chunks().await? {
                self.push_embedding(ChunkEmbeddingJob {
                    id: chunk.id,
                    content: chunk.content,
                })?;
                chunks += 1;
            }
        }

        info!(
            subsystem = "jobs",
            op = "load",
            entries = entry_ids.len(),
            chunks,
            "Pending jobs loaded"
        );
        Ok(())
    }

    /// Start both pools.
    pub fn start(&self) {
        self.entries.start();
        if let Some(pool) = &self.embeddings {
            pool.start();
        }
    }

    /// Stop accepting jobs and drain both pools.
    pub async fn close(&self) {
        tokio::join!(self.entries.close(self.drain_timeout), async {
            if let Some(pool) = &self.embeddings {
                pool.close(self.drain_timeout).await;
            }
        });
        info!(subsystem = "jobs", "Job queue closed");
    }
}

#[async_trait]
impl JobSink for JobQueue {
    async fn add(&self, job: Job) -> Result<()> {
        self.enqueue(job).await
    }
}
