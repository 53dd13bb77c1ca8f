//! OpenAI-compatible embedding client.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info};

use hubble_core::config::LlmConfig;
use hubble_core::defaults::{EMBED_DIMENSION, EMBED_TIMEOUT_SECS};
use hubble_core::{EmbeddingBackend, Error, Result};

use super::error::{to_hubble_error, OpenAIErrorCode};
use super::types::*;

/// Configuration for the embedding client.
#[derive(Clone)]
pub struct EmbeddingConfig {
    /// Base URL, e.g. `http://localhost:11434/v1`.
    pub base_url: String,
    /// Optional for local endpoints.
    pub api_key: Option<String>,
    pub model: String,
    /// Requested and expected vector length.
    pub dimension: usize,
    pub timeout_seconds: u64,
}

impl std::fmt::Debug for EmbeddingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("model", &self.model)
            .field("dimension", &self.dimension)
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

impl EmbeddingConfig {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            model: model.into(),
            dimension: EMBED_DIMENSION,
            timeout_seconds: EMBED_TIMEOUT_SECS,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.api_key = (!key.is_empty()).then_some(key);
        self
    }

    /// Built from the LLM section of the service configuration.
    ///
    /// `None` when embeddings are disabled (no base URL or model).
    pub fn from_llm(llm: &LlmConfig) -> Option<Self> {
        if llm.base_url.trim().is_empty() || llm.embedding_model.trim().is_empty() {
            return None;
        }
        Some(Self::new(&llm.base_url, &llm.embedding_model).with_api_key(&llm.api_key))
    }
}

/// Produces semantic vectors for chunk text.
pub struct EmbeddingClient {
    client: Client,
    config: EmbeddingConfig,
}

impl EmbeddingClient {
    pub fn new(config: EmbeddingConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            subsystem = "inference",
            component = "embedding_client",
            url = %config.base_url,
            model = %config.model,
            dimension = config.dimension,
            "Embedding client initialized"
        );

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &EmbeddingConfig {
        &self.config
    }

    fn build_request(&self, endpoint: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), endpoint);
        let mut req = self.client.post(&url);

        if let Some(ref api_key) = self.config.api_key {
            req = req.header("Authorization", format!("Bearer {}", api_key));
        }

        req.header("Content-Type", "application/json")
    }
}

#[async_trait]
impl EmbeddingBackend for EmbeddingClient {
    /// Embed one text.
    ///
    /// An endpoint that answers with no data yields an empty vector; the
    /// caller decides what an empty result means.
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let start = Instant::now();
        let request = EmbeddingRequest {
            model: &self.config.model,
            input: vec![text],
            encoding_format: Some("float"),
            dimensions: Some(self.config.dimension),
        };

        let response = self
            .build_request("/embeddings")
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Embedding(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            let (message, error_type) = match serde_json::from_str::<OpenAIErrorResponse>(&body) {
                Ok(parsed) => (parsed.error.message, parsed.error.error_type),
                Err(_) if body.is_empty() => ("Unknown error".to_string(), String::new()),
                Err(_) => (body, String::new()),
            };
            let code = OpenAIErrorCode::from_response(status, &error_type);
            return Err(to_hubble_error(code, &format!("{status}: {message}")));
        }

        let result: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::Embedding(format!("Failed to parse response: {}", e)))?;

        let Some(first) = result.data.into_iter().min_by_key(|d| d.index) else {
            return Ok(Vec::new());
        };

        if first.embedding.len() != self.config.dimension {
            return Err(Error::Embedding(format!(
                "expected {} dimensions, got {}",
                self.config.dimension,
                first.embedding.len()
            )));
        }

        debug!(
            subsystem = "inference",
            component = "embedding_client",
            op = "embed",
            model = %self.config.model,
            chars = text.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Generated embedding"
        );
        Ok(first.embedding)
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }
}
