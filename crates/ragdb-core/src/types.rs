//! Domain types shared by the chunker, both indexes and the retrieval path.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type DocId = String;
pub type ChunkId = String;
pub type Meta = BTreeMap<String, String>;

/// Metadata key carrying the document's source URI on every chunk.
pub const META_SOURCE_URI: &str = "source_uri";
/// Metadata key carrying the RFC 3339 ingestion timestamp on every chunk.
pub const META_INGESTED_AT: &str = "ingested_at";
/// Metadata key carrying the chunk's position within its document.
pub const META_CHUNK_INDEX: &str = "chunk_index";

const ID_HEX_LEN: usize = 32;

/// A normalized source document.
///
/// - `doc_id`: stable identity, caller-assigned or derived from content
/// - `source_uri`: where the text came from (path, URL)
/// - `text`: the already-extracted plain text
/// - `metadata`: free-form string pairs inherited by every chunk
///
/// Documents are replaced wholesale on re-ingestion of the same `doc_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub doc_id: DocId,
    pub source_uri: String,
    pub text: String,
    pub metadata: Meta,
    pub ingested_at: DateTime<Utc>,
}

impl Document {
    pub fn new(doc_id: impl Into<DocId>, source_uri: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            doc_id: doc_id.into(),
            source_uri: source_uri.into(),
            text: text.into(),
            metadata: Meta::new(),
            ingested_at: Utc::now(),
        }
    }

    /// Build a document whose id is a hash of its text, for callers without a stable id.
    pub fn from_content(source_uri: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(content_doc_id(&text), source_uri, text)
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_ingested_at(mut self, at: DateTime<Utc>) -> Self {
        self.ingested_at = at;
        self
    }
}

/// Content-derived document id: truncated blake3 of the text.
pub fn content_doc_id(text: &str) -> DocId {
    let hash = blake3::hash(text.as_bytes()).to_hex();
    hash.as_str()[..ID_HEX_LEN].to_string()
}

/// A bounded segment of a document: the unit of indexing and retrieval.
///
/// `offset_start..offset_end` is a byte range into the parent document text
/// and `text` is exactly that slice. `embedding` stays `None` until the
/// embedder produced a vector; hits returned by the indexes never carry it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub chunk_id: ChunkId,
    pub doc_id: DocId,
    pub text: String,
    pub offset_start: usize,
    pub offset_end: usize,
    pub chunk_index: usize,
    pub token_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub metadata: Meta,
}

impl Chunk {
    /// Deterministic chunk id over `(doc_id, offset_start, offset_end, text)`.
    pub fn id_for(doc_id: &str, offset_start: usize, offset_end: usize, text: &str) -> ChunkId {
        let mut hasher = blake3::Hasher::new();
        hasher.update(doc_id.as_bytes());
        hasher.update(&[0]);
        hasher.update(&(offset_start as u64).to_le_bytes());
        hasher.update(&(offset_end as u64).to_le_bytes());
        hasher.update(text.as_bytes());
        let hash = hasher.finalize().to_hex();
        hash.as_str()[..ID_HEX_LEN].to_string()
    }

    pub fn span_len(&self) -> usize {
        self.offset_end.saturating_sub(self.offset_start)
    }

    /// Number of bytes shared with `other`; zero for chunks of different documents.
    pub fn overlap_len(&self, other: &Chunk) -> usize {
        if self.doc_id != other.doc_id {
            return 0;
        }
        let start = self.offset_start.max(other.offset_start);
        let end = self.offset_end.min(other.offset_end);
        end.saturating_sub(start)
    }

    pub fn source_uri(&self) -> Option<&str> {
        self.metadata.get(META_SOURCE_URI).map(String::as_str)
    }

    pub fn ingested_at(&self) -> Option<DateTime<Utc>> {
        self.metadata
            .get(META_INGESTED_AT)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Copy without the vector payload, as stored alongside index hits.
    pub fn without_embedding(&self) -> Chunk {
        Chunk { embedding: None, ..self.clone() }
    }
}

/// Indicates which index produced a result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Lexical,
    Vector,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Lexical => f.write_str("lexical"),
            SourceKind::Vector => f.write_str("vector"),
        }
    }
}

/// Vector similarity used by the vector index. Higher is always better.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Similarity {
    #[default]
    Cosine,
    Dot,
}

impl Similarity {
    pub fn score(self, a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() || a.is_empty() {
            return 0.0;
        }
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        match self {
            Similarity::Dot => dot,
            Similarity::Cosine => {
                let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
                let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
                let denom = norm_a * norm_b;
                if denom < f32::EPSILON {
                    0.0
                } else {
                    dot / denom
                }
            }
        }
    }
}

/// A single ranked result from one index. Transient, never persisted.
///
/// `score` is engine-specific (BM25 or similarity); only the rank order
/// matters to fusion. `chunk` is the stored payload without its vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedHit {
    pub chunk_id: ChunkId,
    pub score: f32,
    pub source: SourceKind,
    pub snippet: String,
    pub chunk: Chunk,
}

/// A chunk after rank fusion, with the sources that agreed on it.
#[derive(Debug, Clone, Serialize)]
pub struct FusedResult {
    pub chunk_id: ChunkId,
    pub fused_score: f64,
    pub contributing_sources: BTreeSet<SourceKind>,
    /// 1-based rank in the lexical result list, if present there.
    pub lexical_rank: Option<usize>,
    /// 1-based rank in the vector result list, if present there.
    pub vector_rank: Option<usize>,
    pub chunk: Chunk,
}

/// Where an assembled chunk came from, for citation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Citation {
    pub doc_id: DocId,
    pub offset_start: usize,
    pub offset_end: usize,
    pub source_uri: Option<String>,
}

impl From<&Chunk> for Citation {
    fn from(chunk: &Chunk) -> Self {
        Self {
            doc_id: chunk.doc_id.clone(),
            offset_start: chunk.offset_start,
            offset_end: chunk.offset_end,
            source_uri: chunk.source_uri().map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextChunk {
    pub chunk: Chunk,
    pub citation: Citation,
    pub fused_score: f64,
    pub tokens: usize,
}

/// Token-budgeted, ordered chunk set handed to a generation step.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContextBundle {
    pub ordered_chunks: Vec<ContextChunk>,
    pub total_tokens: usize,
    pub truncated: bool,
}

impl ContextBundle {
    pub fn len(&self) -> usize {
        self.ordered_chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered_chunks.is_empty()
    }

    /// Numbered plain-text block with one citation header per chunk.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, item) in self.ordered_chunks.iter().enumerate() {
            let c = &item.citation;
            let _ = write!(out, "[{}] {} {}..{}", i + 1, c.doc_id, c.offset_start, c.offset_end);
            if let Some(uri) = &c.source_uri {
                let _ = write!(out, " ({uri})");
            }
            out.push('\n');
            out.push_str(item.chunk.text.trim());
            out.push_str("\n\n");
        }
        out
    }
}
