mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use pretty_assertions::assert_eq;
use ragdb_core::chunker::build_chunks;
use ragdb_core::config::VectorBackend;
use ragdb_core::error::Error;
use ragdb_core::filter::{Filters, MetadataFilter};
use ragdb_core::traits::{LexicalIndex, VectorIndex};
use ragdb_core::types::{Document, SourceKind};
use ragdb_hybrid::{
    HybridEngine, IngestState, RetryPolicy, SearchMode, SearchResults, SourceStatus, Stage, StatusStore,
};
use tokio_util::sync::CancellationToken;

use common::{settings, words, FlakyEmbedder, Harness};

fn three_paragraphs() -> String {
    [words("pine", 40), words("quartz", 40), words("ember", 40)].join("\n\n")
}

#[tokio::test]
async fn end_to_end_query_finds_the_middle_paragraph() {
    let h = Harness::new();
    let text = three_paragraphs();
    let doc = Document::new("field-notes", "notes/field.txt", text.as_str());
    let report = h.engine.ingest(&doc).await.unwrap();
    assert_eq!(report.chunk_count(), 3);
    assert!(report.lexical_only.is_empty());

    // the indexed chunks overlap and cover the text with no gaps
    let chunks = build_chunks(&doc, 50, 10).unwrap();
    let mut expected: Vec<_> = chunks.iter().map(|c| c.chunk_id.clone()).collect();
    expected.sort();
    let mut indexed = report.chunk_ids.clone();
    indexed.sort();
    assert_eq!(indexed, expected);
    assert_eq!(h.lexical.doc_chunk_ids("field-notes").await.unwrap(), expected);
    assert_eq!(h.vector.doc_chunk_ids("field-notes").await.unwrap(), expected);
    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks[0].offset_start, 0);
    assert_eq!(chunks[2].offset_end, text.len());
    for pair in chunks.windows(2) {
        assert!(pair[1].offset_start < pair[0].offset_end, "consecutive chunks overlap");
        assert!(pair[1].offset_start > pair[0].offset_start);
    }

    let out = h
        .engine
        .search("quartz5 quartz6", 3, &Filters::none(), SearchMode::Hits)
        .await
        .unwrap();
    assert!(!out.degraded);
    let SearchResults::Hits(hits) = out.results else { panic!("expected hits") };
    assert_eq!(hits[0].chunk.chunk_index, 1);
    assert!(hits[0].contributing_sources.contains(&SourceKind::Lexical));
    assert_eq!(hits[0].lexical_rank, Some(1));
}

#[tokio::test]
async fn ingesting_twice_changes_nothing() {
    let h = Harness::new();
    let doc = Document::new("doc", "doc.txt", three_paragraphs());
    let first = h.engine.ingest(&doc).await.unwrap();
    let second = h.engine.ingest(&doc).await.unwrap();
    assert_eq!(first.chunk_ids, second.chunk_ids);

    let mut lexical = h.lexical.doc_chunk_ids("doc").await.unwrap();
    let mut vector = h.vector.doc_chunk_ids("doc").await.unwrap();
    lexical.sort();
    vector.sort();
    let mut expected = first.chunk_ids.clone();
    expected.sort();
    assert_eq!(lexical, expected);
    assert_eq!(vector, expected);
    assert_eq!(h.lexical.inner.num_chunks(), 3);
    assert_eq!(h.vector.inner.len(), 3);

    let status = h.status.get("doc").await.unwrap().unwrap();
    assert_eq!(status.state, IngestState::Committed);
    assert_eq!(status.attempts, 1);
}

#[tokio::test]
async fn shorter_replacement_removes_stale_chunks() {
    let h = Harness::new();
    h.engine.ingest(&Document::new("doc", "doc.txt", three_paragraphs())).await.unwrap();
    let replacement = h.engine.ingest(&Document::new("doc", "doc.txt", "Only a short note now.")).await.unwrap();
    assert_eq!(replacement.chunk_count(), 1);

    assert_eq!(h.lexical.doc_chunk_ids("doc").await.unwrap(), replacement.chunk_ids);
    assert_eq!(h.vector.doc_chunk_ids("doc").await.unwrap(), replacement.chunk_ids);

    let out = h.engine.search("ember3", 5, &Filters::none(), SearchMode::Hits).await.unwrap();
    let SearchResults::Hits(hits) = out.results else { panic!("expected hits") };
    assert!(hits.iter().all(|hit| !hit.chunk.text.contains("ember3")));
}

#[tokio::test]
async fn vector_timeout_degrades_to_lexical_ranking() {
    let h = Harness::new();
    h.engine.ingest(&Document::new("a", "a.txt", "solar panel wiring and charge controllers")).await.unwrap();
    h.engine.ingest(&Document::new("b", "b.txt", "rainwater barrels and gutter screens")).await.unwrap();
    h.vector.faults.search_delay_ms.store(5_000, Ordering::SeqCst);

    let started = std::time::Instant::now();
    let retrieval = h.engine.retriever().retrieve("solar wiring", 5, &Filters::none()).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(retrieval.degraded());
    assert_eq!(retrieval.vector, SourceStatus::TimedOut);
    assert_eq!(retrieval.lexical, SourceStatus::Ok { hits: 1 });
    assert_eq!(retrieval.results.len(), 1);
    assert_eq!(retrieval.results[0].chunk.doc_id, "a");
    assert_eq!(retrieval.results[0].vector_rank, None);
}

#[tokio::test]
async fn both_sources_down_is_an_error() {
    let h = Harness::new();
    h.engine.ingest(&Document::new("a", "a.txt", "grain storage in sealed buckets")).await.unwrap();
    h.lexical.faults.search_fails.store(true, Ordering::SeqCst);
    h.vector.faults.search_fails.store(true, Ordering::SeqCst);

    let err = h.engine.search("grain", 3, &Filters::none(), SearchMode::Hits).await.unwrap_err();
    assert!(matches!(err, Error::RetrievalUnavailable { .. }), "{err}");
}

#[tokio::test]
async fn empty_index_and_empty_query_are_not_errors() {
    let h = Harness::new();
    let retrieval = h.engine.retriever().retrieve("anything", 5, &Filters::none()).await.unwrap();
    assert!(retrieval.results.is_empty());
    assert!(!retrieval.degraded());

    let retrieval = h.engine.retriever().retrieve("   ", 5, &Filters::none()).await.unwrap();
    assert!(retrieval.results.is_empty());
    assert!(!retrieval.degraded());
    assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn huge_k_returns_what_exists() {
    let h = Harness::new();
    h.engine.ingest(&Document::new("a", "a.txt", "solar panel wiring")).await.unwrap();
    let retrieval = h.engine.retriever().retrieve("solar", 1_000_000_000, &Filters::none()).await.unwrap();
    assert!(!retrieval.degraded());
    assert_eq!(retrieval.results.len(), 1);

    let retrieval = h.engine.retriever().retrieve("solar", usize::MAX, &Filters::none()).await.unwrap();
    assert_eq!(retrieval.results.len(), 1);
}

#[tokio::test]
async fn embedder_outage_indexes_lexical_only() {
    let h = Harness::with(settings(), FlakyEmbedder::down());
    let report = h.engine.ingest(&Document::new("doc", "doc.txt", three_paragraphs())).await.unwrap();
    assert_eq!(report.lexical_only.len(), 3);
    assert_eq!(report.embedded_count(), 0);
    assert!(h.vector.inner.is_empty());
    assert_eq!(h.lexical.inner.num_chunks(), 3);
    // one batch, three attempts
    assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 3);

    let status = h.status.get("doc").await.unwrap().unwrap();
    assert_eq!(status.state, IngestState::Committed);
    assert_eq!(status.lexical_only, 3);

    let retrieval = h.engine.retriever().retrieve("ember7", 3, &Filters::none()).await.unwrap();
    assert!(retrieval.degraded());
    assert!(matches!(retrieval.vector, SourceStatus::Skipped(_)));
    assert_eq!(retrieval.results[0].chunk.chunk_index, 2);
}

#[tokio::test]
async fn transient_embedding_failure_is_retried() {
    let h = Harness::with(settings(), FlakyEmbedder::new(2));
    let report = h.engine.ingest(&Document::new("doc", "doc.txt", "A single short paragraph.")).await.unwrap();
    assert!(report.lexical_only.is_empty());
    assert_eq!(h.vector.inner.len(), 1);
}

#[tokio::test]
async fn exhausted_index_writes_fail_the_document() {
    let h = Harness::new();
    h.lexical.faults.write_failures.store(100, Ordering::SeqCst);

    let err = h.engine.ingest(&Document::new("doc", "doc.txt", three_paragraphs())).await.unwrap_err();
    assert_eq!(err.doc_id, "doc");
    assert_eq!(err.stage, Stage::Indexing);
    assert_eq!(err.attempts, 3);
    assert!(err.cause.is_transient());

    let failed = h.status.failed().await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].state, IngestState::Failed { stage: Stage::Indexing });
    assert!(failed[0].error.is_some());

    // re-ingestion is the recovery path
    h.lexical.faults.write_failures.store(0, Ordering::SeqCst);
    h.engine.ingest(&Document::new("doc", "doc.txt", three_paragraphs())).await.unwrap();
    let status = h.status.get("doc").await.unwrap().unwrap();
    assert_eq!(status.state, IngestState::Committed);
    assert_eq!(status.attempts, 2);
    assert!(h.status.failed().await.unwrap().is_empty());
}

#[tokio::test]
async fn transient_write_failure_recovers_within_retry_budget() {
    let h = Harness::new();
    h.vector.faults.write_failures.store(2, Ordering::SeqCst);
    let report = h.engine.ingest(&Document::new("doc", "doc.txt", three_paragraphs())).await.unwrap();
    assert_eq!(h.vector.inner.len(), report.chunk_count());
}

#[tokio::test]
async fn chunking_failure_writes_nothing() {
    let h = Harness::new();
    let err = h.engine.ingest(&Document::new("bad", "bad.bin", "binary\0payload")).await.unwrap_err();
    assert_eq!(err.stage, Stage::Chunking);
    assert!(matches!(err.cause, Error::Chunking(_)));
    assert!(h.lexical.doc_chunk_ids("bad").await.unwrap().is_empty());
    assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cancellation_aborts_a_slow_query() {
    let h = Harness::new();
    h.engine.ingest(&Document::new("a", "a.txt", "seed saving and germination tests")).await.unwrap();
    h.lexical.faults.search_delay_ms.store(10_000, Ordering::SeqCst);
    h.vector.faults.search_delay_ms.store(10_000, Ordering::SeqCst);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let out = tokio::time::timeout(
        Duration::from_secs(2),
        h.engine.retriever().retrieve_with_cancel("seed", 3, &Filters::none(), &cancel),
    )
    .await
    .expect("cancellation should be prompt");
    assert!(matches!(out, Err(Error::Cancelled)));
}

#[tokio::test]
async fn cancelled_token_starts_no_search() {
    let h = Harness::new();
    h.engine.ingest(&Document::new("a", "a.txt", "seed saving and germination tests")).await.unwrap();
    let calls = h.embedder.calls.load(Ordering::SeqCst);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let out = h.engine.retriever().retrieve_with_cancel("seed", 3, &Filters::none(), &cancel).await;
    assert!(matches!(out, Err(Error::Cancelled)));
    assert_eq!(h.embedder.calls.load(Ordering::SeqCst), calls);
}

#[tokio::test]
async fn index_and_post_filters() {
    let h = Harness::new();
    let docs = [
        ("tools/axe", "axe sharpening with a whetstone", "tools", "2019"),
        ("tools/saw", "bow saw blade tension and sharpening", "tools", "2023"),
        ("food/bread", "sourdough starter sharpening your baking skills", "food", "2023"),
    ];
    for (id, text, category, year) in docs {
        let doc = Document::new(id, format!("{id}.txt"), text).with_metadata("category", category).with_metadata("year", year);
        h.engine.ingest(&doc).await.unwrap();
    }

    let filters = Filters::index(vec![MetadataFilter::eq("category", "tools")]);
    let retrieval = h.engine.retriever().retrieve("sharpening", 10, &filters).await.unwrap();
    let mut ids: Vec<_> = retrieval.results.iter().map(|r| r.chunk.doc_id.as_str()).collect();
    ids.sort();
    assert_eq!(ids, vec!["tools/axe", "tools/saw"]);

    let filters = filters.with_post("year>=2020".parse().unwrap());
    let retrieval = h.engine.retriever().retrieve("sharpening", 10, &filters).await.unwrap();
    let ids: Vec<_> = retrieval.results.iter().map(|r| r.chunk.doc_id.as_str()).collect();
    assert_eq!(ids, vec!["tools/saw"]);
}

#[tokio::test]
async fn context_mode_respects_budget() {
    let h = Harness::new();
    for (i, topic) in ["cistern", "cistern pump", "cistern filter"].iter().enumerate() {
        let text = format!("{topic} {}", words("w", 48));
        h.engine.ingest(&Document::new(format!("doc{i}"), "x.txt", text)).await.unwrap();
    }
    let out = h
        .engine
        .search("cistern", 3, &Filters::none(), SearchMode::Context { token_budget: 100 })
        .await
        .unwrap();
    let SearchResults::Context(bundle) = out.results else { panic!("expected context") };
    assert!(bundle.truncated);
    assert!(bundle.total_tokens <= 100);
    assert_eq!(bundle.len(), 2);
    assert!(bundle.render().starts_with("[1] "));
}

#[tokio::test]
async fn ingest_many_runs_every_document() {
    let h = Harness::new();
    let docs: Vec<_> = (0..6).map(|i| Document::new(format!("d{i}"), "d.txt", format!("note number {i} about goats"))).collect();
    let results = h.engine.pipeline().ingest_many(docs).await;
    assert_eq!(results.len(), 6);
    assert!(results.iter().all(Result::is_ok));
    assert_eq!(results[3].as_ref().unwrap().doc_id, "d3");
    assert_eq!(h.status.list().await.unwrap().len(), 6);
}

#[tokio::test]
async fn pipeline_retry_policy_can_be_overridden() {
    let h = Harness::with(settings(), FlakyEmbedder::down());
    let pipeline = ragdb_hybrid::IngestionPipeline::new(
        h.embedder.clone(),
        h.lexical.clone(),
        h.vector.clone(),
        h.status.clone(),
        &settings(),
    )
    .with_retry(RetryPolicy::none());
    pipeline.ingest(&Document::new("doc", "doc.txt", "one line")).await.unwrap();
    assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn on_disk_engine_survives_reopen() {
    let tmp = tempfile::TempDir::new().unwrap();
    let mut settings = settings();
    settings.index.data_dir = tmp.path().display().to_string();
    settings.index.vector_backend = VectorBackend::Flat;
    reopen_and_search(&settings).await;
    assert!(settings.index.vector_file().exists());
}

#[cfg(feature = "lance")]
#[tokio::test]
async fn lance_engine_survives_reopen() {
    let tmp = tempfile::TempDir::new().unwrap();
    let mut settings = settings();
    settings.index.data_dir = tmp.path().display().to_string();
    assert_eq!(settings.index.vector_backend, VectorBackend::Lance);
    reopen_and_search(&settings).await;
    assert!(settings.index.lance_path().exists());
}

async fn reopen_and_search(settings: &ragdb_core::config::Settings) {
    {
        let engine = HybridEngine::open(settings).await.unwrap();
        engine.ingest(&Document::new("doc", "doc.txt", three_paragraphs())).await.unwrap();
    }
    let engine = HybridEngine::open(settings).await.unwrap();
    let out = engine.search("quartz20", 1, &Filters::none(), SearchMode::Hits).await.unwrap();
    assert!(!out.degraded);
    let SearchResults::Hits(hits) = out.results else { panic!("expected hits") };
    assert_eq!(hits[0].chunk.chunk_index, 1);
    assert_eq!(engine.status().get("doc").await.unwrap().map(|s| s.state), Some(IngestState::Committed));
    assert!(settings.index.status_file().exists());
}

#[cfg(not(feature = "lance"))]
#[tokio::test]
async fn lance_backend_needs_its_feature() {
    let tmp = tempfile::TempDir::new().unwrap();
    let mut settings = settings();
    settings.index.data_dir = tmp.path().display().to_string();
    settings.index.vector_backend = VectorBackend::Lance;
    let err = HybridEngine::open(&settings).await.err().expect("lance is not compiled in");
    assert!(matches!(err, Error::InvalidConfig(_)));
}
