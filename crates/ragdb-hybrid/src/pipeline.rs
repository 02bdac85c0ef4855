//! Document ingestion: chunk, embed, then write both indexes.
//!
//! Stages run sequentially per document. Index writes are keyed by chunk id,
//! so recovering from any failure means re-running the whole document.

use std::sync::Arc;

use futures::stream::{self, Stream, StreamExt};
use tracing::{debug, error, info, info_span, warn, Instrument};

use ragdb_core::chunker::build_chunks;
use ragdb_core::config::{ChunkingSettings, Settings};
use ragdb_core::error::Error;
use ragdb_core::traits::{Embedder, LexicalIndex, VectorIndex};
use ragdb_core::types::{Chunk, ChunkId, DocId, Document};

use crate::retry::{Exhausted, RetryPolicy};
use crate::status::{DocumentStatus, IngestState, Stage, StatusStore};

/// A document that could not be committed.
#[derive(Debug, thiserror::Error)]
#[error("ingestion of '{doc_id}' failed during {stage} after {attempts} attempt(s): {cause}")]
pub struct IngestionError {
    pub doc_id: DocId,
    pub stage: Stage,
    pub attempts: u32,
    #[source]
    pub cause: Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub doc_id: DocId,
    pub chunk_ids: Vec<ChunkId>,
    /// Chunks written to the lexical index only.
    pub lexical_only: Vec<ChunkId>,
}

impl IngestReport {
    pub fn chunk_count(&self) -> usize {
        self.chunk_ids.len()
    }

    pub fn embedded_count(&self) -> usize {
        self.chunk_ids.len() - self.lexical_only.len()
    }
}

pub struct IngestionPipeline {
    embedder: Arc<dyn Embedder>,
    lexical: Arc<dyn LexicalIndex>,
    vector: Arc<dyn VectorIndex>,
    status: Arc<dyn StatusStore>,
    chunking: ChunkingSettings,
    batch_size: usize,
    retry: RetryPolicy,
    concurrency: usize,
}

impl IngestionPipeline {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        lexical: Arc<dyn LexicalIndex>,
        vector: Arc<dyn VectorIndex>,
        status: Arc<dyn StatusStore>,
        settings: &Settings,
    ) -> Self {
        Self {
            embedder,
            lexical,
            vector,
            status,
            chunking: settings.chunking.clone(),
            batch_size: settings.embedding.batch_size.max(1),
            retry: RetryPolicy::from_settings(&settings.ingest),
            concurrency: settings.ingest.concurrency.max(1),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn status_store(&self) -> &Arc<dyn StatusStore> {
        &self.status
    }

    pub async fn ingest(&self, doc: &Document) -> Result<IngestReport, IngestionError> {
        let span = info_span!("ingest", doc_id = %doc.doc_id);
        self.ingest_inner(doc).instrument(span).await
    }

    /// Ingest up to `ingest.concurrency` documents at a time, yielding results in input order.
    pub fn ingest_stream(&self, docs: Vec<Document>) -> impl Stream<Item = Result<IngestReport, IngestionError>> + '_ {
        stream::iter(docs).map(move |doc| async move { self.ingest(&doc).await }).buffered(self.concurrency)
    }

    pub async fn ingest_many(&self, docs: Vec<Document>) -> Vec<Result<IngestReport, IngestionError>> {
        self.ingest_stream(docs).collect().await
    }

    async fn ingest_inner(&self, doc: &Document) -> Result<IngestReport, IngestionError> {
        let previous_attempts = match self.status.get(&doc.doc_id).await {
            Ok(Some(prev)) if prev.state != IngestState::Committed => prev.attempts,
            _ => 0,
        };
        let mut status = DocumentStatus::received(&doc.doc_id, previous_attempts + 1);
        self.record(&mut status, IngestState::Received).await;

        // Chunking
        self.record(&mut status, IngestState::Chunking).await;
        let mut chunks = match build_chunks(doc, self.chunking.max_chunk_tokens, self.chunking.overlap_tokens) {
            Ok(chunks) => chunks,
            Err(cause) => return Err(self.fail(&mut status, Stage::Chunking, 1, cause).await),
        };
        status.chunk_count = chunks.len();
        debug!(chunks = chunks.len(), "chunked");

        // Embedding
        self.record(&mut status, IngestState::Embedding).await;
        let lexical_only = self.embed_chunks(&mut chunks).await;
        status.lexical_only = lexical_only.len();

        // Indexing
        self.record(&mut status, IngestState::Indexing).await;
        if let Err((what, exhausted)) = self.write_indexes(&doc.doc_id, &chunks).await {
            warn!(step = what, "index write exhausted retries");
            return Err(self.fail(&mut status, Stage::Indexing, exhausted.attempts, exhausted.error).await);
        }

        self.record(&mut status, IngestState::Committed).await;
        info!(chunks = chunks.len(), lexical_only = lexical_only.len(), "committed");
        Ok(IngestReport {
            doc_id: doc.doc_id.clone(),
            chunk_ids: chunks.into_iter().map(|c| c.chunk_id).collect(),
            lexical_only,
        })
    }

    /// Fill `embedding` batch by batch; returns ids of chunks left without a vector.
    async fn embed_chunks(&self, chunks: &mut [Chunk]) -> Vec<ChunkId> {
        let mut lexical_only = Vec::new();
        for batch in chunks.chunks_mut(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            match self.retry.run("embed_batch", || self.embedder.embed_batch(&texts)).await {
                Ok(vectors) if vectors.len() == batch.len() => {
                    for (chunk, vector) in batch.iter_mut().zip(vectors) {
                        chunk.embedding = Some(vector);
                    }
                }
                Ok(vectors) => {
                    warn!(expected = batch.len(), got = vectors.len(), "embedder returned wrong batch size; indexing lexical-only");
                    lexical_only.extend(batch.iter().map(|c| c.chunk_id.clone()));
                }
                Err(Exhausted { attempts, error }) => {
                    warn!(attempts, %error, batch = batch.len(), "embedding failed; indexing lexical-only");
                    lexical_only.extend(batch.iter().map(|c| c.chunk_id.clone()));
                }
            }
        }
        lexical_only
    }

    /// Clear the document from both indexes, then write the new chunk set.
    async fn write_indexes(&self, doc_id: &str, chunks: &[Chunk]) -> Result<(), (&'static str, Exhausted)> {
        self.retry
            .run("lexical.delete_by_doc", || self.lexical.delete_by_doc(doc_id))
            .await
            .map_err(|e| ("lexical.delete_by_doc", e))?;
        self.retry
            .run("vector.delete_by_doc", || self.vector.delete_by_doc(doc_id))
            .await
            .map_err(|e| ("vector.delete_by_doc", e))?;

        let lexical_chunks: Vec<Chunk> = chunks.iter().map(Chunk::without_embedding).collect();
        self.retry
            .run("lexical.upsert_batch", || self.lexical.upsert_batch(&lexical_chunks))
            .await
            .map_err(|e| ("lexical.upsert_batch", e))?;

        let embedded: Vec<Chunk> = chunks.iter().filter(|c| c.embedding.is_some()).cloned().collect();
        if !embedded.is_empty() {
            self.retry
                .run("vector.upsert_batch", || self.vector.upsert_batch(&embedded))
                .await
                .map_err(|e| ("vector.upsert_batch", e))?;
        }
        Ok(())
    }

    async fn record(&self, status: &mut DocumentStatus, state: IngestState) {
        status.state = state;
        status.updated_at = chrono::Utc::now();
        if let Err(e) = self.status.put(status.clone()).await {
            warn!(doc_id = %status.doc_id, %state, error = %e, "failed to persist ingestion status");
        }
    }

    async fn fail(&self, status: &mut DocumentStatus, stage: Stage, attempts: u32, cause: Error) -> IngestionError {
        error!(%stage, attempts, error = %cause, "ingestion failed");
        status.error = Some(cause.to_string());
        self.record(status, IngestState::Failed { stage }).await;
        IngestionError { doc_id: status.doc_id.clone(), stage, attempts, cause }
    }
}
