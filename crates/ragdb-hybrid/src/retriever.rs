//! Hybrid retrieval: concurrent lexical and vector searches fused by rank.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use ragdb_core::config::RetrievalSettings;
use ragdb_core::error::{Error, Result};
use ragdb_core::filter::Filters;
use ragdb_core::traits::{Embedder, LexicalIndex, VectorIndex};
use ragdb_core::types::{FusedResult, RankedHit, SourceKind};

use crate::fusion::{reciprocal_rank_fusion, FusionConfig};

#[derive(Debug, Clone, PartialEq)]
pub struct RetrieverConfig {
    /// Each index is asked for `k * overfetch_factor` candidates.
    pub overfetch_factor: usize,
    pub search_timeout: Duration,
    pub fusion: FusionConfig,
}

impl RetrieverConfig {
    pub fn from_settings(settings: &RetrievalSettings) -> Self {
        Self {
            overfetch_factor: settings.overfetch_factor.max(1),
            search_timeout: settings.search_timeout(),
            fusion: FusionConfig::from_settings(settings),
        }
    }
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self::from_settings(&RetrievalSettings::default())
    }
}

/// Outcome of one source for one query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Ok { hits: usize },
    TimedOut,
    Failed(String),
    /// The source was never queried, e.g. the query could not be embedded.
    Skipped(String),
}

impl SourceStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, SourceStatus::Ok { .. })
    }
}

#[derive(Debug, Clone)]
pub struct Retrieval {
    pub results: Vec<FusedResult>,
    pub lexical: SourceStatus,
    pub vector: SourceStatus,
}

impl Retrieval {
    fn empty() -> Self {
        Self { results: Vec::new(), lexical: SourceStatus::Ok { hits: 0 }, vector: SourceStatus::Ok { hits: 0 } }
    }

    /// True when one of the two sources did not contribute.
    pub fn degraded(&self) -> bool {
        !(self.lexical.is_ok() && self.vector.is_ok())
    }
}

pub struct HybridRetriever {
    embedder: Arc<dyn Embedder>,
    lexical: Arc<dyn LexicalIndex>,
    vector: Arc<dyn VectorIndex>,
    config: RetrieverConfig,
}

impl HybridRetriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        lexical: Arc<dyn LexicalIndex>,
        vector: Arc<dyn VectorIndex>,
        config: RetrieverConfig,
    ) -> Self {
        Self { embedder, lexical, vector, config }
    }

    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    /// Top `k` fused results for `query`.
    ///
    /// A source that fails or times out is reported in the returned
    /// [`Retrieval`] and the other source's hits are still fused. Only when
    /// neither source produced a result list is an error returned.
    pub async fn retrieve(&self, query: &str, k: usize, filters: &Filters) -> Result<Retrieval> {
        let span = info_span!("retrieve", k, filters = filters.index.len() + filters.post.len());
        self.retrieve_inner(query, k, filters).instrument(span).await
    }

    /// Like [`retrieve`](Self::retrieve), abandoning both searches once `cancel` fires.
    ///
    /// Cancellation drops the in-flight futures and returns immediately.
    /// A tantivy search already running on the blocking pool cannot be
    /// interrupted; it finishes in the background and its result is discarded.
    pub async fn retrieve_with_cancel(
        &self,
        query: &str,
        k: usize,
        filters: &Filters,
        cancel: &CancellationToken,
    ) -> Result<Retrieval> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("retrieval cancelled");
                Err(Error::Cancelled)
            }
            out = self.retrieve(query, k, filters) => out,
        }
    }

    async fn retrieve_inner(&self, query: &str, k: usize, filters: &Filters) -> Result<Retrieval> {
        let query = query.trim();
        if query.is_empty() || k == 0 {
            return Ok(Retrieval::empty());
        }
        let fetch = k.saturating_mul(self.config.overfetch_factor);

        let (lexical, vector) = tokio::join!(self.lexical_hits(query, fetch, filters), self.vector_hits(query, fetch, filters));
        let (lexical_hits, lexical_status) = lexical;
        let (vector_hits, vector_status) = vector;

        if !lexical_status.is_ok() && !vector_status.is_ok() {
            warn!(lexical = ?lexical_status, vector = ?vector_status, "both sources unavailable");
            return Err(Error::RetrievalUnavailable {
                lexical: describe(&lexical_status),
                vector: describe(&vector_status),
            });
        }

        let mut results = reciprocal_rank_fusion(lexical_hits, vector_hits, &self.config.fusion, chrono::Utc::now());
        let fused = results.len();
        results.retain(|r| filters.matches_post(&r.chunk.metadata));
        results.truncate(k);

        let retrieval = Retrieval { results, lexical: lexical_status, vector: vector_status };
        info!(fused, returned = retrieval.results.len(), degraded = retrieval.degraded(), "retrieved");
        Ok(retrieval)
    }

    async fn lexical_hits(&self, query: &str, fetch: usize, filters: &Filters) -> (Vec<RankedHit>, SourceStatus) {
        let search = self.lexical.search(query, fetch, &filters.index);
        bounded(SourceKind::Lexical, self.config.search_timeout, search).await
    }

    async fn vector_hits(&self, query: &str, fetch: usize, filters: &Filters) -> (Vec<RankedHit>, SourceStatus) {
        let embedded = tokio::time::timeout(self.config.search_timeout, self.embedder.embed(query)).await;
        let vector = match embedded {
            Ok(Ok(vector)) => vector,
            Ok(Err(e)) => {
                warn!(error = %e, "query embedding failed; lexical-only");
                return (Vec::new(), SourceStatus::Skipped(e.to_string()));
            }
            Err(_) => {
                warn!("query embedding timed out; lexical-only");
                return (Vec::new(), SourceStatus::Skipped("query embedding timed out".to_string()));
            }
        };
        let search = self.vector.search(&vector, fetch, &filters.index);
        bounded(SourceKind::Vector, self.config.search_timeout, search).await
    }
}

async fn bounded<F>(source: SourceKind, after: Duration, search: F) -> (Vec<RankedHit>, SourceStatus)
where
    F: Future<Output = Result<Vec<RankedHit>>>,
{
    match tokio::time::timeout(after, search).await {
        Ok(Ok(hits)) => {
            debug!(%source, hits = hits.len(), "search done");
            let status = SourceStatus::Ok { hits: hits.len() };
            (hits, status)
        }
        Ok(Err(e)) => {
            warn!(%source, error = %e, "search failed");
            (Vec::new(), SourceStatus::Failed(e.to_string()))
        }
        Err(_) => {
            warn!(%source, error = %Error::RetrievalTimeout { index: source, after }, "search timed out");
            (Vec::new(), SourceStatus::TimedOut)
        }
    }
}

fn describe(status: &SourceStatus) -> String {
    match status {
        SourceStatus::Ok { hits } => format!("{hits} hits"),
        SourceStatus::TimedOut => "timed out".to_string(),
        SourceStatus::Failed(e) => e.clone(),
        SourceStatus::Skipped(reason) => format!("skipped: {reason}"),
    }
}
