//! Exact nearest-neighbour index held in memory.
//!
//! Search is a brute-force scan over the chunks that pass the filters, so
//! filtered queries never lose results to a fixed top-k cut.
//!
//! Meant for tests and small corpora. With a snapshot path every write
//! rewrites the whole JSON snapshot (temp file + rename) on the blocking
//! pool, and the in-memory map only changes once that write succeeded, so a
//! failed write can be retried. Persistent deployments use the LanceDB
//! backend.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use ragdb_core::error::{Error, Result};
use ragdb_core::filter::{all_match, MetadataFilter};
use ragdb_core::traits::VectorIndex;
use ragdb_core::types::{Chunk, ChunkId, RankedHit, Similarity, SourceKind};

const SNIPPET_CHARS: usize = 200;

#[derive(Serialize, Deserialize)]
struct Snapshot {
    dim: usize,
    similarity: Similarity,
    chunks: Vec<Chunk>,
}

pub struct FlatVectorIndex {
    dim: usize,
    similarity: Similarity,
    entries: RwLock<HashMap<ChunkId, Chunk>>,
    snapshot: Option<PathBuf>,
    // serializes clone-persist-swap so writers never interleave
    write_gate: Mutex<()>,
}

impl FlatVectorIndex {
    pub fn new(dim: usize, similarity: Similarity) -> Self {
        Self { dim, similarity, entries: RwLock::new(HashMap::new()), snapshot: None, write_gate: Mutex::new(()) }
    }

    /// Load `path` if it exists and keep it updated on every write.
    pub fn open(path: &Path, dim: usize, similarity: Similarity) -> Result<Self> {
        let mut entries = HashMap::new();
        if path.exists() {
            let snapshot: Snapshot = serde_json::from_slice(&std::fs::read(path)?)?;
            if snapshot.dim != dim {
                return Err(Error::EmbeddingDimensionMismatch { expected: dim, actual: snapshot.dim });
            }
            entries.extend(snapshot.chunks.into_iter().map(|c| (c.chunk_id.clone(), c)));
            info!(path = %path.display(), chunks = entries.len(), "loaded vector snapshot");
        }
        Ok(Self {
            dim,
            similarity,
            entries: RwLock::new(entries),
            snapshot: Some(path.to_path_buf()),
            write_gate: Mutex::new(()),
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<ChunkId, Chunk>>> {
        self.entries.read().map_err(|_| Error::Indexing("vector index lock poisoned".into()))
    }

    /// Apply `change` to a copy of the map, persist the copy, then swap it in.
    ///
    /// `change` returns false when nothing changed; the snapshot is then left alone.
    async fn commit<F>(&self, change: F) -> Result<usize>
    where
        F: FnOnce(&mut HashMap<ChunkId, Chunk>) -> bool,
    {
        let _gate = self.write_gate.lock().await;
        let mut next = self.read()?.clone();
        let before = next.len();
        if !change(&mut next) {
            return Ok(0);
        }
        if let Some(path) = &self.snapshot {
            let mut chunks: Vec<Chunk> = next.values().cloned().collect();
            chunks.sort_by(|a, b| a.chunk_id.cmp(&b.chunk_id));
            let snapshot = Snapshot { dim: self.dim, similarity: self.similarity, chunks };
            let path = path.clone();
            tokio::task::spawn_blocking(move || write_snapshot(&path, &snapshot))
                .await
                .map_err(|e| Error::backend("flat", format!("snapshot task failed: {e}")))??;
        }
        let removed = before.saturating_sub(next.len());
        *self.entries.write().map_err(|_| Error::Indexing("vector index lock poisoned".into()))? = next;
        Ok(removed)
    }

    fn check(&self, chunk: &Chunk) -> Result<()> {
        match &chunk.embedding {
            Some(v) if v.len() == self.dim => Ok(()),
            Some(v) => Err(Error::EmbeddingDimensionMismatch { expected: self.dim, actual: v.len() }),
            None => Err(Error::Indexing(format!("chunk {} has no embedding", chunk.chunk_id))),
        }
    }
}

fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&serde_json::to_vec(snapshot)?)?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

fn snippet(text: &str) -> String {
    match text.char_indices().nth(SNIPPET_CHARS) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}

#[async_trait]
impl VectorIndex for FlatVectorIndex {
    async fn upsert_batch(&self, chunks: &[Chunk]) -> Result<()> {
        for chunk in chunks {
            self.check(chunk)?;
        }
        self.commit(|entries| {
            for chunk in chunks {
                entries.insert(chunk.chunk_id.clone(), chunk.clone());
            }
            !chunks.is_empty()
        })
        .await?;
        debug!(count = chunks.len(), "vector upsert");
        Ok(())
    }

    async fn delete(&self, chunk_id: &str) -> Result<()> {
        self.commit(|entries| entries.remove(chunk_id).is_some()).await?;
        Ok(())
    }

    async fn delete_by_doc(&self, doc_id: &str) -> Result<()> {
        let removed = self
            .commit(|entries| {
                let before = entries.len();
                entries.retain(|_, c| c.doc_id != doc_id);
                entries.len() != before
            })
            .await?;
        debug!(doc_id, removed, "vector delete_by_doc");
        Ok(())
    }

    async fn search(&self, query: &[f32], k: usize, filters: &[MetadataFilter]) -> Result<Vec<RankedHit>> {
        if query.len() != self.dim {
            return Err(Error::EmbeddingDimensionMismatch { expected: self.dim, actual: query.len() });
        }
        if k == 0 {
            return Ok(Vec::new());
        }
        let entries = self.read()?;
        let mut scored: Vec<(f32, &Chunk)> = entries
            .values()
            .filter(|c| all_match(filters, &c.metadata))
            .filter_map(|c| c.embedding.as_deref().map(|v| (self.similarity.score(query, v), c)))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.chunk_id.cmp(&b.1.chunk_id)));
        scored.truncate(k);
        Ok(scored
            .into_iter()
            .map(|(score, c)| RankedHit {
                chunk_id: c.chunk_id.clone(),
                score,
                source: SourceKind::Vector,
                snippet: snippet(&c.text),
                chunk: c.without_embedding(),
            })
            .collect())
    }

    async fn doc_chunk_ids(&self, doc_id: &str) -> Result<Vec<ChunkId>> {
        let entries = self.read()?;
        let mut ids: Vec<ChunkId> = entries.values().filter(|c| c.doc_id == doc_id).map(|c| c.chunk_id.clone()).collect();
        ids.sort();
        Ok(ids)
    }
}
