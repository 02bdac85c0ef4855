//! Per-document ingestion state.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use ragdb_core::error::{Error, Result};
use ragdb_core::types::DocId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Chunking,
    Embedding,
    Indexing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Chunking => "chunking",
            Stage::Embedding => "embedding",
            Stage::Indexing => "indexing",
        })
    }
}

/// `Received -> Chunking -> Embedding -> Indexing -> Committed | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum IngestState {
    Received,
    Chunking,
    Embedding,
    Indexing,
    Committed,
    Failed { stage: Stage },
}

impl IngestState {
    pub fn is_failed(&self) -> bool {
        matches!(self, IngestState::Failed { .. })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, IngestState::Committed | IngestState::Failed { .. })
    }
}

impl fmt::Display for IngestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestState::Received => f.write_str("received"),
            IngestState::Chunking => f.write_str("chunking"),
            IngestState::Embedding => f.write_str("embedding"),
            IngestState::Indexing => f.write_str("indexing"),
            IngestState::Committed => f.write_str("committed"),
            IngestState::Failed { stage } => write!(f, "failed ({stage})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentStatus {
    pub doc_id: DocId,
    pub state: IngestState,
    pub chunk_count: usize,
    /// Chunks indexed without a vector because embedding failed.
    pub lexical_only: usize,
    /// Ingestion runs for this document, including the current one.
    pub attempts: u32,
    pub updated_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl DocumentStatus {
    pub fn received(doc_id: &str, attempts: u32) -> Self {
        Self {
            doc_id: doc_id.to_string(),
            state: IngestState::Received,
            chunk_count: 0,
            lexical_only: 0,
            attempts,
            updated_at: Utc::now(),
            error: None,
        }
    }
}

#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn get(&self, doc_id: &str) -> Result<Option<DocumentStatus>>;
    async fn put(&self, status: DocumentStatus) -> Result<()>;
    async fn list(&self) -> Result<Vec<DocumentStatus>>;

    /// Documents whose last run failed: the work list for a retry pass.
    async fn failed(&self) -> Result<Vec<DocumentStatus>> {
        Ok(self.list().await?.into_iter().filter(|s| s.state.is_failed()).collect())
    }
}

#[derive(Default)]
pub struct MemoryStatusStore {
    entries: RwLock<BTreeMap<DocId, DocumentStatus>>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn get(&self, doc_id: &str) -> Result<Option<DocumentStatus>> {
        Ok(self.entries.read().await.get(doc_id).cloned())
    }

    async fn put(&self, status: DocumentStatus) -> Result<()> {
        self.entries.write().await.insert(status.doc_id.clone(), status);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<DocumentStatus>> {
        Ok(self.entries.read().await.values().cloned().collect())
    }
}

/// Status map persisted as one JSON file.
///
/// Every transition is visible in memory; the file is rewritten atomically,
/// off the async workers, only when a document reaches `Committed` or
/// `Failed`. After a restart a document interrupted mid-run shows its last
/// terminal state.
pub struct JsonStatusStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<DocId, DocumentStatus>>,
    // last terminal status per document, mirrored to `path`
    durable: Mutex<BTreeMap<DocId, DocumentStatus>>,
}

impl JsonStatusStore {
    pub fn open(path: &Path) -> Result<Self> {
        let entries: BTreeMap<DocId, DocumentStatus> = if path.exists() {
            serde_json::from_slice(&std::fs::read(path)?)?
        } else {
            BTreeMap::new()
        };
        info!(path = %path.display(), documents = entries.len(), "opened status store");
        Ok(Self {
            path: path.to_path_buf(),
            durable: Mutex::new(entries.clone()),
            entries: RwLock::new(entries),
        })
    }
}

fn save(path: &Path, entries: &BTreeMap<DocId, DocumentStatus>) -> Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&serde_json::to_vec_pretty(entries)?)?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

#[async_trait]
impl StatusStore for JsonStatusStore {
    async fn get(&self, doc_id: &str) -> Result<Option<DocumentStatus>> {
        Ok(self.entries.read().await.get(doc_id).cloned())
    }

    async fn put(&self, status: DocumentStatus) -> Result<()> {
        self.entries.write().await.insert(status.doc_id.clone(), status.clone());
        if !status.state.is_terminal() {
            return Ok(());
        }
        // held across the write so snapshots land in order
        let mut durable = self.durable.lock().await;
        durable.insert(status.doc_id.clone(), status);
        let snapshot = durable.clone();
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || save(&path, &snapshot))
            .await
            .map_err(|e| Error::backend("status", format!("status write task failed: {e}")))?
    }

    async fn list(&self) -> Result<Vec<DocumentStatus>> {
        Ok(self.entries.read().await.values().cloned().collect())
    }
}
