use async_trait::async_trait;

use crate::error::Result;
use crate::filter::MetadataFilter;
use crate::types::{Chunk, ChunkId, RankedHit};

#[async_trait]
pub trait Embedder: Send + Sync {
    fn dim(&self) -> usize;

    /// One vector per input, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut out = self.embed_batch(&[text.to_string()]).await?;
        out.pop().ok_or_else(|| crate::error::Error::EmbeddingUnavailable("embedder returned no vector".into()))
    }
}

/// Keyword index over chunk text and metadata.
///
/// Writes are keyed by `chunk_id`; upserting an existing id replaces it.
/// A write is visible to `search` once the call returns.
#[async_trait]
pub trait LexicalIndex: Send + Sync {
    async fn upsert(&self, chunk: &Chunk) -> Result<()> {
        self.upsert_batch(std::slice::from_ref(chunk)).await
    }
    async fn upsert_batch(&self, chunks: &[Chunk]) -> Result<()>;
    async fn delete(&self, chunk_id: &str) -> Result<()>;
    async fn delete_by_doc(&self, doc_id: &str) -> Result<()>;
    async fn search(&self, query: &str, k: usize, filters: &[MetadataFilter]) -> Result<Vec<RankedHit>>;
    async fn doc_chunk_ids(&self, doc_id: &str) -> Result<Vec<ChunkId>>;
}

/// Nearest-neighbour index over chunk embeddings.
///
/// Only chunks carrying an embedding are accepted.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, chunk: &Chunk) -> Result<()> {
        self.upsert_batch(std::slice::from_ref(chunk)).await
    }
    async fn upsert_batch(&self, chunks: &[Chunk]) -> Result<()>;
    async fn delete(&self, chunk_id: &str) -> Result<()>;
    async fn delete_by_doc(&self, doc_id: &str) -> Result<()>;
    async fn search(&self, query: &[f32], k: usize, filters: &[MetadataFilter]) -> Result<Vec<RankedHit>>;
    async fn doc_chunk_ids(&self, doc_id: &str) -> Result<Vec<ChunkId>>;
}
