use std::time::Duration;

use thiserror::Error;

use crate::types::SourceKind;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Chunking failed: {0}")]
    Chunking(String),

    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    EmbeddingDimensionMismatch { expected: usize, actual: usize },

    #[error("Indexing failed: {0}")]
    Indexing(String),

    #[error("{index} search timed out after {after:?}")]
    RetrievalTimeout { index: SourceKind, after: Duration },

    #[error("Retrieval unavailable (lexical: {lexical}; vector: {vector})")]
    RetrievalUnavailable { lexical: String, vector: String },

    #[error("{engine} backend error: {message}")]
    Backend { engine: &'static str, message: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn backend(engine: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Backend { engine, message: err.to_string() }
    }

    /// Whether repeating the same call may succeed.
    ///
    /// Dimension mismatches, malformed input and bad configuration are
    /// deterministic, so retry loops stop on them immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::EmbeddingUnavailable(_)
            | Error::Indexing(_)
            | Error::RetrievalTimeout { .. }
            | Error::Backend { .. }
            | Error::Io(_) => true,
            Error::InvalidConfig(_)
            | Error::NotFound(_)
            | Error::Chunking(_)
            | Error::EmbeddingDimensionMismatch { .. }
            | Error::RetrievalUnavailable { .. }
            | Error::Cancelled
            | Error::Json(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(Error::EmbeddingUnavailable("down".into()).is_transient());
        assert!(Error::backend("tantivy", "lock busy").is_transient());
        assert!(!Error::EmbeddingDimensionMismatch { expected: 4, actual: 3 }.is_transient());
        assert!(!Error::Chunking("nul byte".into()).is_transient());
    }

    #[test]
    fn messages_carry_context() {
        let err = Error::RetrievalTimeout { index: SourceKind::Vector, after: Duration::from_millis(5) };
        assert_eq!(err.to_string(), "vector search timed out after 5ms");
        let err = Error::EmbeddingDimensionMismatch { expected: 384, actual: 768 };
        assert_eq!(err.to_string(), "Embedding dimension mismatch: expected 384, got 768");
    }
}
