#![cfg(feature = "lance")]

use ragdb_core::filter::MetadataFilter;
use ragdb_core::traits::VectorIndex;
use ragdb_core::types::{Chunk, Meta, Similarity};
use ragdb_vector::LanceVectorIndex;
use tempfile::TempDir;

fn chunk(doc: &str, idx: usize, vector: [f32; 3], year: &str) -> Chunk {
    let text = format!("{doc} section {idx}");
    let mut metadata = Meta::new();
    metadata.insert("year".into(), year.into());
    metadata.insert("doc".into(), doc.into());
    Chunk {
        chunk_id: Chunk::id_for(doc, idx, idx + 1, &text),
        doc_id: doc.to_string(),
        text,
        offset_start: idx,
        offset_end: idx + 1,
        chunk_index: idx,
        token_count: 3,
        embedding: Some(vector.to_vec()),
        metadata,
    }
}

#[tokio::test]
async fn merge_insert_filters_and_delete_by_doc() {
    let tmp = TempDir::new().unwrap();
    let index = LanceVectorIndex::open(tmp.path(), "chunks", 3, Similarity::Cosine).await.unwrap();
    let chunks = vec![
        chunk("a", 0, [1.0, 0.0, 0.0], "2019"),
        chunk("a", 1, [0.8, 0.2, 0.0], "2022"),
        chunk("b", 0, [0.0, 1.0, 0.0], "2023"),
    ];
    index.upsert_batch(&chunks).await.unwrap();
    // same ids again must not duplicate rows
    index.upsert_batch(&chunks).await.unwrap();
    assert_eq!(index.doc_chunk_ids("a").await.unwrap().len(), 2);

    let hits = index.search(&[1.0, 0.0, 0.0], 1, &[]).await.unwrap();
    assert_eq!(hits[0].chunk_id, chunks[0].chunk_id);

    let eq = [MetadataFilter::eq("doc", "b")];
    let hits = index.search(&[1.0, 0.0, 0.0], 5, &eq).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk.doc_id, "b");

    let range = [MetadataFilter::range("year", Some("2020"), None)];
    let hits = index.search(&[1.0, 0.0, 0.0], 5, &range).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].chunk_id, chunks[1].chunk_id);

    index.delete_by_doc("a").await.unwrap();
    assert!(index.doc_chunk_ids("a").await.unwrap().is_empty());
    assert_eq!(index.doc_chunk_ids("b").await.unwrap().len(), 1);
}

#[tokio::test]
async fn range_filter_finds_match_behind_many_nearer_rows() {
    let tmp = TempDir::new().unwrap();
    let index = LanceVectorIndex::open(tmp.path(), "chunks", 3, Similarity::Cosine).await.unwrap();
    let mut chunks: Vec<Chunk> = (0..20).map(|i| chunk("old", i, [1.0, 0.01 * i as f32, 0.0], "2019")).collect();
    let far = chunk("new", 0, [0.0, 0.0, 1.0], "2023");
    chunks.push(far.clone());
    index.upsert_batch(&chunks).await.unwrap();

    let range = [MetadataFilter::range("year", Some("2020"), None)];
    let hits = index.search(&[1.0, 0.0, 0.0], 1, &range).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk_id, far.chunk_id);
}

#[tokio::test]
async fn huge_k_is_clamped_to_table_size() {
    let tmp = TempDir::new().unwrap();
    let index = LanceVectorIndex::open(tmp.path(), "chunks", 3, Similarity::Cosine).await.unwrap();
    index.upsert_batch(&[chunk("a", 0, [1.0, 0.0, 0.0], "2020")]).await.unwrap();
    let hits = index.search(&[1.0, 0.0, 0.0], 1_000_000_000, &[]).await.unwrap();
    assert_eq!(hits.len(), 1);
}
