//! Job variants accepted by the queue and their JSON envelope.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Process a newly created entry through its workspace plugins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryJob {
    pub entry_id: i32,
}

/// Generate the embedding for a single chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkEmbeddingJob {
    pub id: i32,
    pub content: String,
}

/// Fan out to one `ChunkEmbeddingJob` per unindexed chunk of each entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryChunkEmbeddingJob {
    pub entries: Vec<Uuid>,
}

/// Any job the queue can dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Job {
    Entry(EntryJob),
    ChunkEmbedding(ChunkEmbeddingJob),
    EntryChunkEmbedding(EntryChunkEmbeddingJob),
}

impl Job {
    const KINDS: [&'static str; 3] = ["entry", "chunk_embedding", "entry_chunk_embedding"];

    pub fn kind(&self) -> &'static str {
        match self {
            Job::Entry(_) => "entry",
            Job::ChunkEmbedding(_) => "chunk_embedding",
            Job::EntryChunkEmbedding(_) => "entry_chunk_embedding",
        }
    }

    /// Serialize to the JSON envelope.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a JSON envelope.
    ///
    /// An envelope whose `kind` is not one of the known variants fails with
    /// `Error::UnsupportedJobType` rather than a generic parse error.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let value: JsonValue = serde_json::from_slice(bytes)?;
        let kind = value
            .get("kind")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| Error::Serialization("job envelope has no kind".to_string()))?;

        if !Self::KINDS.contains(&kind) {
            return Err(Error::UnsupportedJobType(kind.to_string()));
        }

        Ok(serde_json::from_value(value)?)
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Job::Entry(j) => write!(f, "entry({})", j.entry_id),
            Job::ChunkEmbedding(j) => write!(f, "chunk_embedding({})", j.id),
            Job::EntryChunkEmbedding(j) => {
                write!(f, "entry_chunk_embedding({} entries)", j.entries.len())
            }
        }
    }
}

impl From<EntryJob> for Job {
    fn from(job: EntryJob) -> Self {
        Job::Entry(job)
    }
}

impl From<ChunkEmbeddingJob> for Job {
    fn from(job: ChunkEmbeddingJob) -> Self {
        Job::ChunkEmbedding(job)
    }
}

impl From<EntryChunkEmbeddingJob> for Job {
    fn from(job: EntryChunkEmbeddingJob) -> Self {
        Job::EntryChunkEmbedding(job)
    }
}
