//! Layered configuration and path helpers.
//!
//! Uses Figment to merge built-in defaults + `config.toml` + `config.<env>.toml`
//! + `APP_*` env vars (nested keys split on `__`, e.g.
//! `APP_RETRIEVAL__OVERFETCH_FACTOR=5`). Provides helpers to expand `~` and
//! `${VAR}` and to resolve relative paths against a known base directory.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::types::Similarity;

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
        let config = Self::for_env(&env_name);
        config.settings()?;
        Ok(config)
    }

    pub fn for_env(env_name: &str) -> Self {
        let mut figment = Figment::from(Serialized::defaults(Settings::default())).merge(Toml::file("config.toml"));
        match env_name {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));
        Self { figment }
    }

    pub fn from_figment(figment: Figment) -> Self {
        Self { figment }
    }

    pub fn get<T>(&self, key: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| Error::InvalidConfig(format!("Failed to get '{key}': {e}")))
    }

    /// The full typed settings tree, validated.
    pub fn settings(&self) -> Result<Settings> {
        let settings: Settings = self
            .figment
            .extract()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub chunking: ChunkingSettings,
    pub embedding: EmbeddingSettings,
    pub index: IndexSettings,
    pub ingest: IngestSettings,
    pub retrieval: RetrievalSettings,
    pub context: ContextSettings,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(Error::InvalidConfig(msg.to_string()));
        if self.chunking.max_chunk_tokens == 0 {
            return invalid("chunking.max_chunk_tokens must be > 0");
        }
        if self.chunking.overlap_tokens >= self.chunking.max_chunk_tokens {
            return invalid("chunking.overlap_tokens must be < chunking.max_chunk_tokens");
        }
        if self.embedding.dim == 0 {
            return invalid("embedding.dim must be > 0");
        }
        if self.embedding.batch_size == 0 {
            return invalid("embedding.batch_size must be > 0");
        }
        if self.ingest.retry_attempts == 0 {
            return invalid("ingest.retry_attempts must be >= 1");
        }
        if self.ingest.concurrency == 0 {
            return invalid("ingest.concurrency must be >= 1");
        }
        if self.retrieval.overfetch_factor == 0 {
            return invalid("retrieval.overfetch_factor must be >= 1");
        }
        if !(self.retrieval.rank_constant >= 0.0) {
            return invalid("retrieval.rank_constant must be >= 0");
        }
        if self.retrieval.recency_half_life_days <= 0.0 {
            return invalid("retrieval.recency_half_life_days must be > 0");
        }
        if !(self.context.overlap_dedup_ratio > 0.0 && self.context.overlap_dedup_ratio <= 1.0) {
            return invalid("context.overlap_dedup_ratio must be in (0, 1]");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    pub max_chunk_tokens: usize,
    pub overlap_tokens: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self { max_chunk_tokens: 256, overlap_tokens: 32 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmbeddingProvider {
    /// Deterministic feature-hashing embedder; no model files needed.
    #[default]
    Hash,
    /// Remote Ollama `/api/embed` endpoint.
    Ollama,
    /// Local BGE-M3 weights through candle (feature `candle`).
    BgeM3,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub provider: EmbeddingProvider,
    pub dim: usize,
    pub batch_size: usize,
    pub model: Option<String>,
    pub url: Option<String>,
    pub request_timeout_ms: u64,
    pub model_dir: Option<String>,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Hash,
            dim: 384,
            batch_size: 32,
            model: None,
            url: None,
            request_timeout_ms: 30_000,
            model_dir: None,
        }
    }
}

impl EmbeddingSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackend {
    /// Exact in-process index with a JSON snapshot at `vector_path`, for tests and small corpora.
    Flat,
    /// LanceDB table under `lance_dir` (feature `lance`).
    #[default]
    Lance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    pub data_dir: String,
    pub tantivy_dir: String,
    pub vector_backend: VectorBackend,
    pub vector_path: String,
    pub lance_dir: String,
    pub lance_table: String,
    pub status_path: String,
    pub similarity: Similarity,
    pub writer_memory_bytes: usize,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            tantivy_dir: "indexes/tantivy".to_string(),
            vector_backend: VectorBackend::Lance,
            vector_path: "indexes/vectors.json".to_string(),
            lance_dir: "indexes/lancedb".to_string(),
            lance_table: "chunks".to_string(),
            status_path: "status.json".to_string(),
            similarity: Similarity::Cosine,
            writer_memory_bytes: 50_000_000,
        }
    }
}

impl IndexSettings {
    pub fn data_path(&self) -> PathBuf {
        expand_path(&self.data_dir)
    }

    pub fn tantivy_path(&self) -> PathBuf {
        resolve_with_base(&self.data_path(), &self.tantivy_dir)
    }

    pub fn vector_file(&self) -> PathBuf {
        resolve_with_base(&self.data_path(), &self.vector_path)
    }

    pub fn lance_path(&self) -> PathBuf {
        resolve_with_base(&self.data_path(), &self.lance_dir)
    }

    pub fn status_file(&self) -> PathBuf {
        resolve_with_base(&self.data_path(), &self.status_path)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub concurrency: usize,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self { retry_attempts: 3, retry_backoff_ms: 200, max_backoff_ms: 5_000, concurrency: 4 }
    }
}

impl IngestSettings {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub default_k: usize,
    pub overfetch_factor: usize,
    pub rank_constant: f64,
    pub search_timeout_ms: u64,
    pub recency_weight: f64,
    pub recency_half_life_days: f64,
    pub authority_key: Option<String>,
    pub authority_weight: f64,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            default_k: 5,
            overfetch_factor: 3,
            rank_constant: 60.0,
            search_timeout_ms: 2_000,
            recency_weight: 0.0,
            recency_half_life_days: 30.0,
            authority_key: None,
            authority_weight: 0.0,
        }
    }
}

impl RetrievalSettings {
    pub fn search_timeout(&self) -> Duration {
        Duration::from_millis(self.search_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextSettings {
    pub token_budget: usize,
    /// Fraction of a candidate's span that must already be covered by an
    /// included chunk of the same document for the candidate to be dropped.
    pub overlap_dedup_ratio: f64,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self { token_budget: 1024, overlap_dedup_ratio: 0.5 }
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    // Expand env vars first
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    // Expand ~ at start
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
