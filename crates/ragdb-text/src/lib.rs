//! ragdb-text
//!
//! Tantivy-backed lexical index. Tantivy calls are synchronous, so every
//! trait method runs on the blocking pool.
pub mod index;
pub mod search;
pub mod tantivy_utils;

use std::sync::Arc;

use async_trait::async_trait;
use ragdb_core::error::{Error, Result};
use ragdb_core::filter::MetadataFilter;
use ragdb_core::traits::LexicalIndex;
use ragdb_core::types::{Chunk, ChunkId, RankedHit};

pub use index::TantivyLexicalIndex;

use index::Inner;

impl TantivyLexicalIndex {
	async fn blocking<T, F>(&self, f: F) -> Result<T>
	where
		T: Send + 'static,
		F: FnOnce(&Inner) -> Result<T> + Send + 'static,
	{
		let inner = Arc::clone(&self.inner);
		tokio::task::spawn_blocking(move || f(&inner))
			.await
			.map_err(|e| Error::backend("tantivy", format!("blocking task failed: {e}")))?
	}
}

#[async_trait]
impl LexicalIndex for TantivyLexicalIndex {
	async fn upsert_batch(&self, chunks: &[Chunk]) -> Result<()> {
		let chunks = chunks.to_vec();
		self.blocking(move |inner| inner.upsert_batch(&chunks)).await
	}

	async fn delete(&self, chunk_id: &str) -> Result<()> {
		let chunk_id = chunk_id.to_string();
		self.blocking(move |inner| inner.delete(&chunk_id)).await
	}

	async fn delete_by_doc(&self, doc_id: &str) -> Result<()> {
		let doc_id = doc_id.to_string();
		self.blocking(move |inner| inner.delete_by_doc(&doc_id)).await
	}

	async fn search(&self, query: &str, k: usize, filters: &[MetadataFilter]) -> Result<Vec<RankedHit>> {
		let query = query.to_string();
		let filters = filters.to_vec();
		self.blocking(move |inner| inner.search(&query, k, &filters)).await
	}

	async fn doc_chunk_ids(&self, doc_id: &str) -> Result<Vec<ChunkId>> {
		let doc_id = doc_id.to_string();
		self.blocking(move |inner| inner.doc_chunk_ids(&doc_id)).await
	}
}
