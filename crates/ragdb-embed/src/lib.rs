//! Embedding models and the dimension-checking client used by ingestion and retrieval.

use std::sync::Arc;

use ragdb_core::config::{EmbeddingProvider, EmbeddingSettings};
use ragdb_core::error::{Error, Result};
use ragdb_core::traits::Embedder;
use tracing::info;

mod client;
mod hash;
mod ollama;

#[cfg(feature = "candle")]
mod bge;
#[cfg(feature = "candle")]
mod device;
#[cfg(feature = "candle")]
mod pool;
#[cfg(feature = "candle")]
mod tokenize;

pub use client::EmbedderClient;
pub use hash::HashEmbedder;
pub use ollama::{OllamaEmbedder, DEFAULT_OLLAMA_URL};

#[cfg(feature = "candle")]
pub use bge::{BgeM3Embedder, BGE_M3_DIM};
#[cfg(feature = "candle")]
pub use pool::masked_mean_l2;

/// Build the configured model wrapped in an [`EmbedderClient`].
pub fn get_default_embedder(settings: &EmbeddingSettings) -> Result<Arc<dyn Embedder>> {
    let model: Arc<dyn Embedder> = match settings.provider {
        EmbeddingProvider::Hash => {
            info!(dim = settings.dim, "using hash embedder");
            Arc::new(HashEmbedder::new(settings.dim))
        }
        EmbeddingProvider::Ollama => {
            let model = settings
                .model
                .as_deref()
                .ok_or_else(|| Error::InvalidConfig("embedding.model required for Ollama provider".into()))?;
            info!(model, url = settings.url.as_deref().unwrap_or(DEFAULT_OLLAMA_URL), "using Ollama embedder");
            Arc::new(OllamaEmbedder::new(settings.url.as_deref(), model, settings.dim, settings.request_timeout())?)
        }
        EmbeddingProvider::BgeM3 => load_bge(settings)?,
    };
    Ok(Arc::new(EmbedderClient::new(model, settings.dim, settings.request_timeout())))
}

#[cfg(feature = "candle")]
fn load_bge(settings: &EmbeddingSettings) -> Result<Arc<dyn Embedder>> {
    if settings.dim != BGE_M3_DIM {
        return Err(Error::EmbeddingDimensionMismatch { expected: settings.dim, actual: BGE_M3_DIM });
    }
    Ok(Arc::new(BgeM3Embedder::load(settings.model_dir.as_deref())?))
}

#[cfg(not(feature = "candle"))]
fn load_bge(_settings: &EmbeddingSettings) -> Result<Arc<dyn Embedder>> {
    Err(Error::InvalidConfig("embedding.provider = \"bge-m3\" requires the `candle` feature".into()))
}
