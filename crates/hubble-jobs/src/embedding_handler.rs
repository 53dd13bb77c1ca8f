//! Generates and stores the embedding of one chunk.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use hubble_core::{
    ChunkEmbeddingJob, ChunkEmbeddingUpdate, ChunkRepository, EmbeddingBackend, Error,
};

use crate::handler::{JobHandler, JobResult};

/// Error recorded when a job is dropped while its chunk is `processing`.
const INTERRUPTED: &str = "embedding interrupted before completion";

/// Marks a chunk failed unless disarmed. Covers the pool dropping the job on
/// timeout, which would otherwise leave the chunk `processing` and invisible
/// to retries and the reconcile sweep.
struct InFlight {
    chunks: Arc<dyn ChunkRepository>,
    chunk_id: i32,
    armed: bool,
}

impl InFlight {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let chunk_id = self.chunk_id;
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(
                subsystem = "jobs",
                component = "embedding_handler",
                chunk_id,
                "Chunk left processing, no runtime to reset it"
            );
            return;
        };
        let chunks = Arc::clone(&self.chunks);
        runtime.spawn(async move {
            let update = ChunkEmbeddingUpdate::failed(chunk_id, INTERRUPTED.to_string());
            match chunks.update_embedding_state(update).await {
                Ok(()) => warn!(
                    subsystem = "jobs",
                    component = "embedding_handler",
                    chunk_id,
                    "Interrupted embedding marked failed"
                ),
                Err(e) => error!(
                    subsystem = "jobs",
                    component = "embedding_handler",
                    chunk_id,
                    error = %e,
                    "Failed to reset interrupted embedding"
                ),
            }
        });
    }
}

pub struct EmbeddingHandler {
    chunks: Arc<dyn ChunkRepository>,
    backend: Arc<dyn EmbeddingBackend>,
}

impl EmbeddingHandler {
    pub fn new(chunks: Arc<dyn ChunkRepository>, backend: Arc<dyn EmbeddingBackend>) -> Self {
        Self { chunks, backend }
    }

    /// Write `update`, logging failures. Returns whether it was stored.
    async fn record(&self, update: ChunkEmbeddingUpdate) -> bool {
        let chunk_id = update.chunk_id;
        match self.chunks.update_embedding_state(update).await {
            Ok(()) => true,
            Err(e) => {
                error!(
                    subsystem = "jobs",
                    component = "embedding_handler",
                    chunk_id,
                    error = %e,
                    "Failed to record embedding state"
                );
                false
            }
        }
    }

    /// Record the final state of an in-flight chunk.
    async fn settle(&self, in_flight: InFlight, update: ChunkEmbeddingUpdate) {
        if self.record(update).await {
            in_flight.disarm();
        }
    }
}

#[async_trait]
impl JobHandler<ChunkEmbeddingJob> for EmbeddingHandler {
    fn kind(&self) -> &'static str {
        "chunk_embedding"
    }

    async fn execute(&self, job: &ChunkEmbeddingJob) -> JobResult {
        if job.id == 0 {
            return JobResult::Failed("chunk id must be non-zero".to_string());
        }

        match self.chunks.can_embed_chunk(job.id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(
                    subsystem = "jobs",
                    component = "embedding_handler",
                    chunk_id = job.id,
                    "Chunk already embedded or gone"
                );
                return JobResult::Success;
            }
            Err(e) => return JobResult::from_error(&e),
        }

        self.record(ChunkEmbeddingUpdate::processing(job.id)).await;
        let in_flight = InFlight {
            chunks: Arc::clone(&self.chunks),
            chunk_id: job.id,
            armed: true,
        };

        let start = Instant::now();
        let vector = match self.backend.embed(&job.content).await {
            Ok(vector) if vector.is_empty() => {
                let e = Error::Embedding("provider returned an empty embedding".to_string());
                self.settle(in_flight, ChunkEmbeddingUpdate::failed(job.id, e.to_string()))
                    .await;
                return JobResult::from_error(&e);
            }
            Ok(vector) => vector,
            Err(e) => {
                self.settle(in_flight, ChunkEmbeddingUpdate::failed(job.id, e.to_string()))
                    .await;
                return JobResult::from_error(&e);
            }
        };

        let dimension = vector.len();
        self.settle(in_flight, ChunkEmbeddingUpdate::done(job.id, vector))
            .await;
        debug!(
            subsystem = "jobs",
            component = "embedding_handler",
            chunk_id = job.id,
            dimension,
            duration_ms = start.elapsed().as_millis() as u64,
            "Chunk embedded"
        );
        JobResult::Success
    }
}
