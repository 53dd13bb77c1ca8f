//! OpenAI-compatible embedding endpoint.
//!
//! Works with any server exposing `POST /embeddings` in the OpenAI shape:
//! OpenAI itself, Ollama in compatibility mode, vLLM, LocalAI, LM Studio.
//!
//! # Example
//!
//! ```rust,no_run
//! use hubble_core::EmbeddingBackend;
//! use hubble_inference::openai::{EmbeddingClient, EmbeddingConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = EmbeddingConfig::new("http://localhost:11434/v1", "nomic-embed-text");
//!     let client = EmbeddingClient::new(config).unwrap();
//!     let vector = client.embed("Hello, world!").await.unwrap();
//!     assert_eq!(vector.len(), 768);
//! }
//! ```

mod client;
mod error;
mod types;

pub use client::{EmbeddingClient, EmbeddingConfig};
pub use error::{to_hubble_error, OpenAIErrorCode};
pub use types::*;
