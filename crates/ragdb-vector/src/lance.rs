//! LanceDB-backed vector index.
//!
//! Equality filters are pushed into the scan as `array_has(meta_kv, 'k=v')`.
//! Range filters have no list-column equivalent, so a filtered scan first
//! resolves the matching chunk ids and the vector search is restricted to
//! them with a `chunk_id IN (..)` prefilter.

use std::path::Path;
use std::sync::Arc;

use arrow_array::builder::{ListBuilder, StringBuilder};
use arrow_array::{Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::{connect, Connection, DistanceType, Table};
use tracing::{debug, info};

use ragdb_core::error::{Error, Result};
use ragdb_core::filter::{all_match, MetadataFilter};
use ragdb_core::traits::VectorIndex;
use ragdb_core::types::{Chunk, ChunkId, RankedHit, Similarity, SourceKind};

use crate::schema::build_chunk_schema;

fn lance_err(e: impl std::fmt::Display) -> Error {
	Error::backend("lancedb", e)
}

fn quote(s: &str) -> String {
	format!("'{}'", s.replace('\'', "''"))
}

pub struct LanceVectorIndex {
	table: Table,
	dim: usize,
	similarity: Similarity,
}

impl LanceVectorIndex {
	pub async fn open(db_path: &Path, table_name: &str, dim: usize, similarity: Similarity) -> Result<Self> {
		let conn = connect(db_path.to_string_lossy().as_ref()).execute().await.map_err(lance_err)?;
		let table = ensure_table(&conn, table_name, dim).await?;
		info!(path = %db_path.display(), table = table_name, "opened lancedb table");
		Ok(Self { table, dim, similarity })
	}

	fn to_record_batch(&self, chunks: &[Chunk]) -> Result<RecordBatch> {
		let mut meta_kv = ListBuilder::new(StringBuilder::new());
		let mut vectors: Vec<Option<Vec<Option<f32>>>> = Vec::with_capacity(chunks.len());
		let mut payloads = Vec::with_capacity(chunks.len());
		for chunk in chunks {
			let embedding = chunk
				.embedding
				.as_ref()
				.ok_or_else(|| Error::Indexing(format!("chunk {} has no embedding", chunk.chunk_id)))?;
			if embedding.len() != self.dim {
				return Err(Error::EmbeddingDimensionMismatch { expected: self.dim, actual: embedding.len() });
			}
			for (k, v) in &chunk.metadata {
				meta_kv.values().append_value(format!("{k}={v}"));
			}
			meta_kv.append(true);
			vectors.push(Some(embedding.iter().map(|&x| Some(x)).collect()));
			payloads.push(serde_json::to_string(&chunk.without_embedding())?);
		}
		RecordBatch::try_new(
			build_chunk_schema(self.dim as i32),
			vec![
				Arc::new(StringArray::from_iter_values(chunks.iter().map(|c| c.chunk_id.as_str()))),
				Arc::new(StringArray::from_iter_values(chunks.iter().map(|c| c.doc_id.as_str()))),
				Arc::new(meta_kv.finish()),
				Arc::new(StringArray::from(payloads)),
				Arc::new(FixedSizeListArray::from_iter_primitive::<arrow_array::types::Float32Type, _, _>(
					vectors.into_iter(),
					self.dim as i32,
				)),
			],
		)
		.map_err(lance_err)
	}

	async fn collect_chunk_ids(&self, filter: &str) -> Result<Vec<ChunkId>> {
		let mut stream = self
			.table
			.query()
			.only_if(filter)
			.select(Select::columns(&["chunk_id"]))
			.execute()
			.await
			.map_err(lance_err)?;
		let mut ids = Vec::new();
		while let Some(batch) = stream.try_next().await.map_err(lance_err)? {
			let col = string_column(&batch, "chunk_id")?;
			ids.extend((0..col.len()).map(|i| col.value(i).to_string()));
		}
		ids.sort();
		Ok(ids)
	}

	/// Ids of the chunks passing every filter, evaluated on the stored payloads.
	async fn range_candidates(&self, filters: &[MetadataFilter]) -> Result<Vec<ChunkId>> {
		let mut query = self.table.query().select(Select::columns(&["chunk_id", "payload"]));
		if let Some(predicate) = pushdown(filters) {
			query = query.only_if(predicate);
		}
		let mut stream = query.execute().await.map_err(lance_err)?;
		let mut ids = Vec::new();
		while let Some(batch) = stream.try_next().await.map_err(lance_err)? {
			let chunk_ids = string_column(&batch, "chunk_id")?;
			let payloads = string_column(&batch, "payload")?;
			for i in 0..batch.num_rows() {
				let chunk: Chunk = serde_json::from_str(payloads.value(i))?;
				if all_match(filters, &chunk.metadata) {
					ids.push(chunk_ids.value(i).to_string());
				}
			}
		}
		Ok(ids)
	}
}

async fn ensure_table(conn: &Connection, name: &str, dim: usize) -> Result<Table> {
	let names = conn.table_names().execute().await.map_err(lance_err)?;
	if !names.iter().any(|n| n == name) {
		let schema = build_chunk_schema(dim as i32);
		let iter = RecordBatchIterator::new(vec![].into_iter(), schema);
		conn.create_table(name, Box::new(iter)).execute().await.map_err(lance_err)?;
	}
	conn.open_table(name).execute().await.map_err(lance_err)
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
	batch
		.column_by_name(name)
		.and_then(|c| c.as_any().downcast_ref::<StringArray>())
		.ok_or_else(|| Error::backend("lancedb", format!("{name} column missing")))
}

fn pushdown(filters: &[MetadataFilter]) -> Option<String> {
	let clauses: Vec<String> = filters
		.iter()
		.filter_map(|f| match f {
			MetadataFilter::Eq { key, value } => Some(format!("array_has(meta_kv, {})", quote(&format!("{key}={value}")))),
			MetadataFilter::Range { .. } => None,
		})
		.collect();
	(!clauses.is_empty()).then(|| clauses.join(" AND "))
}

#[async_trait]
impl VectorIndex for LanceVectorIndex {
	async fn upsert_batch(&self, chunks: &[Chunk]) -> Result<()> {
		if chunks.is_empty() {
			return Ok(());
		}
		let batch = self.to_record_batch(chunks)?;
		let schema = batch.schema();
		let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
		let mut mi = self.table.merge_insert(&["chunk_id"]);
		mi.when_matched_update_all(None).when_not_matched_insert_all();
		mi.execute(reader).await.map_err(lance_err)?;
		debug!(count = chunks.len(), "lancedb upsert");
		Ok(())
	}

	async fn delete(&self, chunk_id: &str) -> Result<()> {
		self.table.delete(&format!("chunk_id = {}", quote(chunk_id))).await.map_err(lance_err)?;
		Ok(())
	}

	/// One delete predicate, one Lance commit.
	async fn delete_by_doc(&self, doc_id: &str) -> Result<()> {
		self.table.delete(&format!("doc_id = {}", quote(doc_id))).await.map_err(lance_err)?;
		Ok(())
	}

	async fn search(&self, query: &[f32], k: usize, filters: &[MetadataFilter]) -> Result<Vec<RankedHit>> {
		if query.len() != self.dim {
			return Err(Error::EmbeddingDimensionMismatch { expected: self.dim, actual: query.len() });
		}
		if k == 0 {
			return Ok(Vec::new());
		}
		let has_range = filters.iter().any(|f| matches!(f, MetadataFilter::Range { .. }));
		let (limit, predicate) = if has_range {
			let ids = self.range_candidates(filters).await?;
			if ids.is_empty() {
				return Ok(Vec::new());
			}
			let list = ids.iter().map(|id| quote(id)).collect::<Vec<_>>().join(", ");
			(k.min(ids.len()), Some(format!("chunk_id IN ({list})")))
		} else {
			let rows = self.table.count_rows(pushdown(filters)).await.map_err(lance_err)?;
			(k.min(rows), pushdown(filters))
		};
		if limit == 0 {
			return Ok(Vec::new());
		}
		let distance = match self.similarity {
			Similarity::Cosine => DistanceType::Cosine,
			Similarity::Dot => DistanceType::Dot,
		};
		let mut search = self.table.vector_search(query.to_vec()).map_err(lance_err)?.distance_type(distance).limit(limit);
		if let Some(predicate) = predicate {
			search = search.only_if(predicate);
		}
		let mut stream = search.execute().await.map_err(lance_err)?;

		let mut hits = Vec::new();
		while let Some(batch) = stream.try_next().await.map_err(lance_err)? {
			let payloads = string_column(&batch, "payload")?;
			let distances = batch.column_by_name("_distance").and_then(|c| c.as_any().downcast_ref::<Float32Array>());
			for i in 0..batch.num_rows() {
				let chunk: Chunk = serde_json::from_str(payloads.value(i))?;
				let score = distances.map_or(0.0, |d| 1.0 - d.value(i));
				hits.push(RankedHit {
					chunk_id: chunk.chunk_id.clone(),
					score,
					source: SourceKind::Vector,
					snippet: chunk.text.chars().take(200).collect(),
					chunk,
				});
			}
		}
		hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.chunk_id.cmp(&b.chunk_id)));
		hits.truncate(k);
		Ok(hits)
	}

	async fn doc_chunk_ids(&self, doc_id: &str) -> Result<Vec<ChunkId>> {
		self.collect_chunk_ids(&format!("doc_id = {}", quote(doc_id))).await
	}
}
