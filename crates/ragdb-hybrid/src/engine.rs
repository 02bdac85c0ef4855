use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use ragdb_core::config::{Settings, VectorBackend};
use ragdb_core::error::Result;
use ragdb_core::filter::Filters;
use ragdb_core::traits::{Embedder, LexicalIndex, VectorIndex};
use ragdb_core::types::{ContextBundle, Document, FusedResult};
use ragdb_text::TantivyLexicalIndex;
use ragdb_vector::FlatVectorIndex;

use crate::assembler::ContextAssembler;
use crate::pipeline::{IngestReport, IngestionError, IngestionPipeline};
use crate::retriever::{HybridRetriever, RetrieverConfig, SourceStatus};
use crate::status::{JsonStatusStore, StatusStore};

/// What `search` hands back: ranked hits or an assembled context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Hits,
    Context { token_budget: usize },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum SearchResults {
    Hits(Vec<FusedResult>),
    Context(ContextBundle),
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchOutput {
    pub results: SearchResults,
    pub degraded: bool,
    pub lexical: SourceStatus,
    pub vector: SourceStatus,
}

/// Ingestion and retrieval over one shared set of adapters.
pub struct HybridEngine {
    settings: Settings,
    pipeline: IngestionPipeline,
    retriever: HybridRetriever,
    assembler: ContextAssembler,
    status: Arc<dyn StatusStore>,
}

impl HybridEngine {
    pub fn new(
        settings: Settings,
        embedder: Arc<dyn Embedder>,
        lexical: Arc<dyn LexicalIndex>,
        vector: Arc<dyn VectorIndex>,
        status: Arc<dyn StatusStore>,
    ) -> Self {
        let pipeline = IngestionPipeline::new(
            Arc::clone(&embedder),
            Arc::clone(&lexical),
            Arc::clone(&vector),
            Arc::clone(&status),
            &settings,
        );
        let retriever = HybridRetriever::new(embedder, lexical, vector, RetrieverConfig::from_settings(&settings.retrieval));
        let assembler = ContextAssembler::from_settings(&settings.context);
        Self { settings, pipeline, retriever, assembler, status }
    }

    /// Open the on-disk tantivy index, vector store and status file under `index.data_dir`.
    pub async fn open(settings: &Settings) -> Result<Self> {
        settings.validate()?;
        let index = &settings.index;
        let lexical = TantivyLexicalIndex::open_in_dir(&index.tantivy_path(), index.writer_memory_bytes)?;
        let vector = open_vector_index(settings).await?;
        let status = JsonStatusStore::open(&index.status_file())?;
        let embedder = ragdb_embed::get_default_embedder(&settings.embedding)?;
        info!(data_dir = %index.data_path().display(), backend = ?index.vector_backend, "engine opened");
        Ok(Self::new(settings.clone(), embedder, Arc::new(lexical), vector, Arc::new(status)))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn pipeline(&self) -> &IngestionPipeline {
        &self.pipeline
    }

    pub fn retriever(&self) -> &HybridRetriever {
        &self.retriever
    }

    pub fn status(&self) -> &Arc<dyn StatusStore> {
        &self.status
    }

    pub async fn ingest(&self, doc: &Document) -> std::result::Result<IngestReport, IngestionError> {
        self.pipeline.ingest(doc).await
    }

    pub async fn search(&self, query: &str, k: usize, filters: &Filters, mode: SearchMode) -> Result<SearchOutput> {
        let retrieval = self.retriever.retrieve(query, k, filters).await?;
        let degraded = retrieval.degraded();
        let results = match mode {
            SearchMode::Hits => SearchResults::Hits(retrieval.results),
            SearchMode::Context { token_budget } => {
                SearchResults::Context(self.assembler.assemble(&retrieval.results, token_budget))
            }
        };
        Ok(SearchOutput { results, degraded, lexical: retrieval.lexical, vector: retrieval.vector })
    }
}

async fn open_vector_index(settings: &Settings) -> Result<Arc<dyn VectorIndex>> {
    let index = &settings.index;
    match index.vector_backend {
        VectorBackend::Flat => {
            let flat = FlatVectorIndex::open(&index.vector_file(), settings.embedding.dim, index.similarity)?;
            Ok(Arc::new(flat))
        }
        VectorBackend::Lance => open_lance(settings).await,
    }
}

#[cfg(feature = "lance")]
async fn open_lance(settings: &Settings) -> Result<Arc<dyn VectorIndex>> {
    let index = &settings.index;
    let lance = ragdb_vector::LanceVectorIndex::open(
        &index.lance_path(),
        &index.lance_table,
        settings.embedding.dim,
        index.similarity,
    )
    .await?;
    Ok(Arc::new(lance))
}

#[cfg(not(feature = "lance"))]
async fn open_lance(_settings: &Settings) -> Result<Arc<dyn VectorIndex>> {
    Err(ragdb_core::error::Error::InvalidConfig("index.vector_backend = \"lance\" requires the `lance` feature".into()))
}
