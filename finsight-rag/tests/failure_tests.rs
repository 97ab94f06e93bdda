//! Indexing and retrieval when the index or the embedder misbehaves.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{
    BagOfWordsEmbedder, FlakyIndex, SlowEmbedder, pipeline_with, test_config, three_section_filing,
};
use finsight_rag::{ChunkKind, DocumentKey, IndexOutcome, MetadataFilter, RagError};
use tokio::time::Instant;

const FILINGS: &str = "sec_filings";
const NEWS: &str = "news_articles";

fn key() -> DocumentKey {
    DocumentKey::filing("AAPL", "10-K", 2024)
}

#[tokio::test]
async fn failed_child_query_drops_only_that_parents_children() {
    let index = Arc::new(FlakyIndex::failing_children_of("Item_1A"));
    let pipeline = pipeline_with(Arc::new(BagOfWordsEmbedder::new()), index.clone());
    pipeline.indexer().index_document("AAPL", "10-K", 2024, &three_section_filing()).await.unwrap();

    let results = pipeline
        .retriever()
        .query("supply chain concentration risk", "AAPL", None, Some(20))
        .await
        .unwrap();

    let children: Vec<_> = results.iter().filter(|r| r.kind == ChunkKind::Child).collect();
    assert!(!children.is_empty());
    assert!(children.iter().all(|c| !c.parent_id.as_deref().unwrap_or("").contains("Item_1A")));
    assert!(
        results.iter().any(|r| r.kind == ChunkKind::Parent && r.chunk_id.contains("Item_1A")),
        "the parent itself still ranks"
    );
    assert!(results.windows(2).all(|w| w[0].distance <= w[1].distance));
}

#[tokio::test]
async fn failed_upsert_is_a_pipeline_error_and_not_recorded() {
    let index = Arc::new(FlakyIndex::new());
    index.fail_upserts.store(true, Ordering::SeqCst);
    let pipeline = pipeline_with(Arc::new(BagOfWordsEmbedder::new()), index.clone());
    let filing = three_section_filing();

    let err = pipeline.indexer().index_document("AAPL", "10-K", 2024, &filing).await.unwrap_err();
    assert!(matches!(&err, RagError::PipelineError(msg) if msg.contains("disk full")), "{err:?}");
    assert!(!pipeline.indexer().is_indexed(&key()).await.unwrap());
    assert!(pipeline.indexer().indexed_documents(FILINGS).await.unwrap().is_empty());
    assert_eq!(pipeline.vector_index().count(FILINGS, &MetadataFilter::new()).await.unwrap(), 0);

    index.fail_upserts.store(false, Ordering::SeqCst);
    let outcome = pipeline.indexer().index_document("AAPL", "10-K", 2024, &filing).await.unwrap();
    assert!(matches!(outcome, IndexOutcome::Indexed { .. }));
    assert_eq!(index.upserts_attempted.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn stalled_upsert_times_out_and_is_not_recorded() {
    let index = Arc::new(FlakyIndex::new());
    index.stall_upserts.store(true, Ordering::SeqCst);
    let pipeline = pipeline_with(Arc::new(BagOfWordsEmbedder::new()), index.clone());
    let filing = three_section_filing();

    let started = Instant::now();
    let err = pipeline.indexer().index_document("AAPL", "10-K", 2024, &filing).await.unwrap_err();
    let limit = test_config().storage.write_timeout();
    let RagError::Timeout { operation, after } = &err else {
        panic!("expected a timeout, got {err:?}");
    };
    assert_eq!((operation.as_str(), *after), ("upsert", limit));
    assert!(started.elapsed() < Duration::from_secs(3600));
    assert!(!pipeline.indexer().is_indexed(&key()).await.unwrap());
    assert!(pipeline.indexer().indexed_documents(FILINGS).await.unwrap().is_empty());

    index.stall_upserts.store(false, Ordering::SeqCst);
    let outcome = pipeline.indexer().index_document("AAPL", "10-K", 2024, &filing).await.unwrap();
    assert!(matches!(outcome, IndexOutcome::Indexed { .. }));
}

#[tokio::test(start_paused = true)]
async fn stalled_query_embedding_times_out() {
    let provider = Arc::new(SlowEmbedder::stalling_on("QUERYSTALL"));
    let pipeline = pipeline_with(provider, Arc::new(FlakyIndex::new()));
    pipeline.indexer().index_document("AAPL", "10-K", 2024, &three_section_filing()).await.unwrap();
    let retriever = pipeline.retriever();

    let err = retriever.query("QUERYSTALL supply chain", "AAPL", None, None).await.unwrap_err();
    assert!(matches!(err, RagError::Timeout { .. }), "{err:?}");

    let err = retriever
        .query_multi_source("QUERYSTALL supply chain", "AAPL", &[FILINGS, NEWS], None)
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::Timeout { .. }), "{err:?}");

    assert!(!retriever.query("supply chain", "AAPL", None, None).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn stalled_parent_query_times_out() {
    let index = Arc::new(FlakyIndex::new());
    let pipeline = pipeline_with(Arc::new(BagOfWordsEmbedder::new()), index.clone());
    pipeline.indexer().index_document("AAPL", "10-K", 2024, &three_section_filing()).await.unwrap();
    index.stall_parent_queries.store(true, Ordering::SeqCst);
    let retriever = pipeline.retriever();

    let started = Instant::now();
    let err = retriever.query("supply chain", "AAPL", None, None).await.unwrap_err();
    assert!(
        matches!(&err, RagError::Timeout { operation, .. } if operation == "parent query"),
        "{err:?}"
    );
    assert!(started.elapsed() >= retriever.config().query_timeout());
    assert!(started.elapsed() < Duration::from_secs(3600));

    // The filings search fails on its own; the news search is unaffected.
    let by_collection =
        retriever.query_multi_source("supply chain", "AAPL", &[FILINGS, NEWS], None).await.unwrap();
    assert!(by_collection[FILINGS].is_empty());
    assert!(by_collection.contains_key(NEWS));
}

#[tokio::test(start_paused = true)]
async fn stalled_sub_batch_indexes_with_zero_vectors() {
    let provider = Arc::new(SlowEmbedder::stalling_on("operating margin"));
    let pipeline = pipeline_with(provider, Arc::new(FlakyIndex::new()));

    let filing = three_section_filing();
    let outcome = pipeline.indexer().index_document("AAPL", "10-K", 2024, &filing).await.unwrap();
    let IndexOutcome::Indexed { chunks, failed_embeddings } = outcome else {
        panic!("expected a fresh index, got {outcome:?}");
    };
    assert!(failed_embeddings > 0);
    assert!(failed_embeddings < chunks);
    assert!(pipeline.indexer().is_indexed(&key()).await.unwrap());

    let records = pipeline.indexer().indexed_documents(FILINGS).await.unwrap();
    assert_eq!(records[0].failed_embeddings, failed_embeddings);
}
