use std::time::Duration;

use async_trait::async_trait;
use ragdb_core::error::{Error, Result};
use ragdb_core::traits::Embedder;
use serde::Deserialize;
use tracing::debug;

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Embedder backed by a local Ollama instance (`POST /api/embed`).
///
/// Makes exactly one request per batch. Retries belong to the caller, which
/// can tell transient failures (connection, 429, 5xx) from permanent ones.
pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dim: usize,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaEmbedder {
    pub fn new(url: Option<&str>, model: &str, dim: usize, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::InvalidConfig(format!("http client: {e}")))?;
        Ok(Self {
            client,
            url: url.unwrap_or(DEFAULT_OLLAMA_URL).trim_end_matches('/').to_string(),
            model: model.to_string(),
            dim,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let response = self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::EmbeddingUnavailable(format!("Ollama connection error (is Ollama running at {}?): {e}", self.url)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = format!("Ollama API error {status}: {text}");
            if status.as_u16() == 429 || status.is_server_error() {
                return Err(Error::EmbeddingUnavailable(message));
            }
            return Err(Error::InvalidConfig(message));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| Error::EmbeddingUnavailable(format!("Invalid Ollama response: {e}")))?;
        debug!(count = parsed.embeddings.len(), model = %self.model, "ollama embeddings");
        Ok(parsed.embeddings)
    }
}
