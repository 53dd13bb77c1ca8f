//! # hubble-inference
//!
//! Embedding generation for hubble.
//!
//! Chunk text is turned into fixed-dimension vectors by an OpenAI-compatible
//! `/embeddings` endpoint; see [`openai::EmbeddingClient`].

pub mod openai;

pub use openai::{EmbeddingClient, EmbeddingConfig};
