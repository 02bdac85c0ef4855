//! Ingestion pipeline, hybrid retriever and context assembly over the
//! lexical and vector index adapters.
pub mod assembler;
pub mod engine;
pub mod fusion;
pub mod pipeline;
pub mod retriever;
pub mod retry;
pub mod status;

pub use assembler::ContextAssembler;
pub use engine::{HybridEngine, SearchMode, SearchOutput, SearchResults};
pub use fusion::{reciprocal_rank_fusion, FusionConfig};
pub use pipeline::{IngestReport, IngestionError, IngestionPipeline};
pub use retriever::{HybridRetriever, Retrieval, RetrieverConfig, SourceStatus};
pub use retry::RetryPolicy;
pub use status::{DocumentStatus, IngestState, JsonStatusStore, MemoryStatusStore, Stage, StatusStore};
