use std::path::Path;
use std::sync::{Arc, Mutex};

use tantivy::collector::DocSetCollector;
use tantivy::directory::MmapDirectory;
use tantivy::query::TermQuery;
use tantivy::schema::{Field, IndexRecordOption, Value};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tracing::{debug, info};

use ragdb_core::error::{Error, Result};
use ragdb_core::types::{Chunk, ChunkId};

use crate::tantivy_utils::{build_schema, meta_term, register_tokenizer, F_CHUNK_ID, F_DOC_ID, F_META, F_PAYLOAD, F_TEXT};

const MIN_WRITER_MEMORY: usize = 15_000_000;

pub(crate) fn tantivy_err(e: impl std::fmt::Display) -> Error {
	Error::backend("tantivy", e)
}

pub(crate) struct Fields {
	pub chunk_id: Field,
	pub doc_id: Field,
	pub text: Field,
	pub meta: Field,
	pub payload: Field,
}

pub(crate) struct Inner {
	pub index: Index,
	pub reader: IndexReader,
	pub writer: Mutex<IndexWriter>,
	pub fields: Fields,
}

/// BM25 index over chunk text, one tantivy document per chunk.
///
/// Writes commit and reload the reader before returning, so they are
/// immediately searchable. Clones share the same index and writer.
#[derive(Clone)]
pub struct TantivyLexicalIndex {
	pub(crate) inner: Arc<Inner>,
}

impl TantivyLexicalIndex {
	/// Open the index in `dir`, creating it when missing.
	pub fn open_in_dir(dir: &Path, writer_memory_bytes: usize) -> Result<Self> {
		std::fs::create_dir_all(dir)?;
		let directory = MmapDirectory::open(dir).map_err(tantivy_err)?;
		let index = Index::open_or_create(directory, build_schema()).map_err(tantivy_err)?;
		info!(dir = %dir.display(), "opened tantivy index");
		Self::from_index(index, writer_memory_bytes)
	}

	pub fn in_ram() -> Result<Self> {
		Self::from_index(Index::create_in_ram(build_schema()), MIN_WRITER_MEMORY)
	}

	fn from_index(index: Index, writer_memory_bytes: usize) -> Result<Self> {
		register_tokenizer(&index);
		let schema = index.schema();
		let field = |name: &str| schema.get_field(name).map_err(tantivy_err);
		let fields = Fields {
			chunk_id: field(F_CHUNK_ID)?,
			doc_id: field(F_DOC_ID)?,
			text: field(F_TEXT)?,
			meta: field(F_META)?,
			payload: field(F_PAYLOAD)?,
		};
		let writer: IndexWriter = index
			.writer_with_num_threads(1, writer_memory_bytes.max(MIN_WRITER_MEMORY))
			.map_err(tantivy_err)?;
		let reader: IndexReader = index
			.reader_builder()
			.reload_policy(ReloadPolicy::Manual)
			.try_into()
			.map_err(tantivy_err)?;
		Ok(Self { inner: Arc::new(Inner { index, reader, writer: Mutex::new(writer), fields }) })
	}

	pub fn num_chunks(&self) -> u64 {
		self.inner.reader.searcher().num_docs()
	}
}

impl Inner {
	fn to_document(&self, chunk: &Chunk) -> Result<TantivyDocument> {
		let f = &self.fields;
		let mut doc = TantivyDocument::default();
		doc.add_text(f.chunk_id, &chunk.chunk_id);
		doc.add_text(f.doc_id, &chunk.doc_id);
		doc.add_text(f.text, &chunk.text);
		for (key, value) in &chunk.metadata {
			doc.add_text(f.meta, meta_term(key, value));
		}
		doc.add_text(f.payload, serde_json::to_string(&chunk.without_embedding())?);
		Ok(doc)
	}

	/// Run `ops` against the writer and commit; roll back if anything fails.
	fn write<F>(&self, ops: F) -> Result<()>
	where
		F: FnOnce(&mut IndexWriter) -> Result<()>,
	{
		let mut writer = self.writer.lock().map_err(|_| Error::Indexing("tantivy writer lock poisoned".into()))?;
		let outcome = ops(&mut writer).and_then(|()| writer.commit().map(|_| ()).map_err(tantivy_err));
		if let Err(e) = outcome {
			let _ = writer.rollback();
			return Err(e);
		}
		drop(writer);
		self.reader.reload().map_err(tantivy_err)
	}

	pub fn upsert_batch(&self, chunks: &[Chunk]) -> Result<()> {
		if chunks.is_empty() {
			return Ok(());
		}
		let docs = chunks.iter().map(|c| self.to_document(c)).collect::<Result<Vec<_>>>()?;
		self.write(|writer| {
			for (chunk, doc) in chunks.iter().zip(docs) {
				writer.delete_term(Term::from_field_text(self.fields.chunk_id, &chunk.chunk_id));
				writer.add_document(doc).map_err(tantivy_err)?;
			}
			Ok(())
		})?;
		debug!(count = chunks.len(), "tantivy upsert");
		Ok(())
	}

	pub fn delete(&self, chunk_id: &str) -> Result<()> {
		self.write(|writer| {
			writer.delete_term(Term::from_field_text(self.fields.chunk_id, chunk_id));
			Ok(())
		})
	}

	/// All chunks of the document go away in a single commit.
	pub fn delete_by_doc(&self, doc_id: &str) -> Result<()> {
		self.write(|writer| {
			writer.delete_term(Term::from_field_text(self.fields.doc_id, doc_id));
			Ok(())
		})?;
		debug!(doc_id, "tantivy delete_by_doc");
		Ok(())
	}

	pub fn doc_chunk_ids(&self, doc_id: &str) -> Result<Vec<ChunkId>> {
		let searcher = self.reader.searcher();
		let query = TermQuery::new(Term::from_field_text(self.fields.doc_id, doc_id), IndexRecordOption::Basic);
		let addresses = searcher.search(&query, &DocSetCollector).map_err(tantivy_err)?;
		let mut ids = Vec::with_capacity(addresses.len());
		for addr in addresses {
			let doc: TantivyDocument = searcher.doc(addr).map_err(tantivy_err)?;
			if let Some(id) = doc.get_first(self.fields.chunk_id).and_then(|v| v.as_str()) {
				ids.push(id.to_string());
			}
		}
		ids.sort();
		Ok(ids)
	}
}
