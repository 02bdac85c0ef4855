#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ragdb_core::config::Settings;
use ragdb_core::error::{Error, Result};
use ragdb_core::filter::MetadataFilter;
use ragdb_core::traits::{Embedder, LexicalIndex, VectorIndex};
use ragdb_core::types::{Chunk, ChunkId, RankedHit, Similarity};
use ragdb_embed::HashEmbedder;
use ragdb_hybrid::{HybridEngine, MemoryStatusStore};
use ragdb_text::TantivyLexicalIndex;
use ragdb_vector::FlatVectorIndex;

pub const DIM: usize = 64;

pub fn settings() -> Settings {
    let mut settings = Settings::default();
    settings.embedding.dim = DIM;
    settings.chunking.max_chunk_tokens = 50;
    settings.chunking.overlap_tokens = 10;
    settings.ingest.retry_attempts = 3;
    settings.ingest.retry_backoff_ms = 1;
    settings.ingest.max_backoff_ms = 5;
    settings.retrieval.search_timeout_ms = 300;
    settings
}

/// `n` distinct words `prefix0 prefix1 ...`.
pub fn words(prefix: &str, n: usize) -> String {
    (0..n).map(|i| format!("{prefix}{i}")).collect::<Vec<_>>().join(" ")
}

/// Hash embedder that fails the first `fail_first` calls, or every call once `down` is set.
pub struct FlakyEmbedder {
    inner: HashEmbedder,
    pub fail_first: AtomicU32,
    pub down: AtomicBool,
    pub calls: AtomicU32,
}

impl FlakyEmbedder {
    pub fn new(fail_first: u32) -> Self {
        Self {
            inner: HashEmbedder::new(DIM),
            fail_first: AtomicU32::new(fail_first),
            down: AtomicBool::new(false),
            calls: AtomicU32::new(0),
        }
    }

    pub fn down() -> Self {
        let embedder = Self::new(0);
        embedder.down.store(true, Ordering::SeqCst);
        embedder
    }
}

#[async_trait]
impl Embedder for FlakyEmbedder {
    fn dim(&self) -> usize {
        DIM
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(Error::EmbeddingUnavailable("connection refused".into()));
        }
        let remaining = self.fail_first.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_first.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::EmbeddingUnavailable("429 too many requests".into()));
        }
        self.inner.embed_batch(texts).await
    }
}

/// Knobs shared by the faulty index wrappers.
#[derive(Default)]
pub struct Faults {
    /// Number of upcoming writes (upserts and deletes) to fail.
    pub write_failures: AtomicU32,
    pub search_fails: AtomicBool,
    /// Milliseconds to sleep before each search.
    pub search_delay_ms: AtomicU32,
}

impl Faults {
    fn check_write(&self, engine: &'static str) -> Result<()> {
        let remaining = self.write_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.write_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::backend(engine, "write rejected"));
        }
        Ok(())
    }

    async fn before_search(&self, engine: &'static str) -> Result<()> {
        let delay = self.search_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(u64::from(delay))).await;
        }
        if self.search_fails.load(Ordering::SeqCst) {
            return Err(Error::backend(engine, "search unavailable"));
        }
        Ok(())
    }
}

pub struct FaultyLexical {
    pub inner: TantivyLexicalIndex,
    pub faults: Faults,
}

impl FaultyLexical {
    pub fn new() -> Self {
        Self { inner: TantivyLexicalIndex::in_ram().unwrap(), faults: Faults::default() }
    }
}

#[async_trait]
impl LexicalIndex for FaultyLexical {
    async fn upsert_batch(&self, chunks: &[Chunk]) -> Result<()> {
        self.faults.check_write("tantivy")?;
        self.inner.upsert_batch(chunks).await
    }

    async fn delete(&self, chunk_id: &str) -> Result<()> {
        self.faults.check_write("tantivy")?;
        self.inner.delete(chunk_id).await
    }

    async fn delete_by_doc(&self, doc_id: &str) -> Result<()> {
        self.faults.check_write("tantivy")?;
        self.inner.delete_by_doc(doc_id).await
    }

    async fn search(&self, query: &str, k: usize, filters: &[MetadataFilter]) -> Result<Vec<RankedHit>> {
        self.faults.before_search("tantivy").await?;
        self.inner.search(query, k, filters).await
    }

    async fn doc_chunk_ids(&self, doc_id: &str) -> Result<Vec<ChunkId>> {
        self.inner.doc_chunk_ids(doc_id).await
    }
}

pub struct FaultyVector {
    pub inner: FlatVectorIndex,
    pub faults: Faults,
}

impl FaultyVector {
    pub fn new() -> Self {
        Self { inner: FlatVectorIndex::new(DIM, Similarity::Cosine), faults: Faults::default() }
    }
}

#[async_trait]
impl VectorIndex for FaultyVector {
    async fn upsert_batch(&self, chunks: &[Chunk]) -> Result<()> {
        self.faults.check_write("flat")?;
        self.inner.upsert_batch(chunks).await
    }

    async fn delete(&self, chunk_id: &str) -> Result<()> {
        self.faults.check_write("flat")?;
        self.inner.delete(chunk_id).await
    }

    async fn delete_by_doc(&self, doc_id: &str) -> Result<()> {
        self.faults.check_write("flat")?;
        self.inner.delete_by_doc(doc_id).await
    }

    async fn search(&self, query: &[f32], k: usize, filters: &[MetadataFilter]) -> Result<Vec<RankedHit>> {
        self.faults.before_search("flat").await?;
        self.inner.search(query, k, filters).await
    }

    async fn doc_chunk_ids(&self, doc_id: &str) -> Result<Vec<ChunkId>> {
        self.inner.doc_chunk_ids(doc_id).await
    }
}

/// An in-memory engine plus handles on its fault-injectable parts.
pub struct Harness {
    pub engine: HybridEngine,
    pub embedder: Arc<FlakyEmbedder>,
    pub lexical: Arc<FaultyLexical>,
    pub vector: Arc<FaultyVector>,
    pub status: Arc<MemoryStatusStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(settings(), FlakyEmbedder::new(0))
    }

    pub fn with(settings: Settings, embedder: FlakyEmbedder) -> Self {
        let embedder = Arc::new(embedder);
        let lexical = Arc::new(FaultyLexical::new());
        let vector = Arc::new(FaultyVector::new());
        let status = Arc::new(MemoryStatusStore::new());
        let engine = HybridEngine::new(
            settings,
            embedder.clone(),
            lexical.clone(),
            vector.clone(),
            status.clone(),
        );
        Self { engine, embedder, lexical, vector, status }
    }
}
