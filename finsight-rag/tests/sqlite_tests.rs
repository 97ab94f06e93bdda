//! Persistence of the SQLite-backed index across reopen.

#![cfg(feature = "sqlite")]

mod common;

use std::sync::Arc;

use common::{BagOfWordsEmbedder, DIMS, test_config, three_section_filing};
use finsight_rag::{
    Chunk, ChunkKind, ChunkMetadata, DocumentKey, IndexOutcome, IndexedDocumentRecord,
    MetadataFilter, RagConfig, RagPipeline, SqliteVectorIndex, VectorIndex,
};
use tempfile::TempDir;

fn config_in(dir: &TempDir) -> RagConfig {
    let mut config = test_config();
    config.storage.path = dir.path().join("index");
    config
}

#[tokio::test]
async fn indexed_filing_survives_reopen() {
    finsight_rag::logging::init();
    let dir = TempDir::new().unwrap();
    let key = DocumentKey::filing("AAPL", "10-K", 2024);

    let filing = three_section_filing();

    let stored = {
        let provider = Arc::new(BagOfWordsEmbedder::new());
        let pipeline = RagPipeline::open(config_in(&dir), provider).await.unwrap();
        let outcome =
            pipeline.indexer().index_document("AAPL", "10-K", 2024, &filing).await.unwrap();
        let IndexOutcome::Indexed { chunks, .. } = outcome else {
            panic!("expected a fresh index, got {outcome:?}");
        };
        chunks
    };

    let provider = Arc::new(BagOfWordsEmbedder::new());
    let pipeline = RagPipeline::open(config_in(&dir), provider.clone()).await.unwrap();
    assert!(pipeline.indexer().is_indexed(&key).await.unwrap());
    assert_eq!(pipeline.stats().await.unwrap()["sec_filings"], stored);

    let outcome = pipeline.indexer().index_document("AAPL", "10-K", 2024, &filing).await.unwrap();
    assert_eq!(outcome, IndexOutcome::AlreadyIndexed);
    assert_eq!(provider.calls(), 0);

    let results = pipeline
        .retriever()
        .query("supply chain concentration risk", "aapl", None, Some(6))
        .await
        .unwrap();
    assert!(!results.is_empty() && results.len() <= 6);
    assert!(results.windows(2).all(|w| w[0].distance <= w[1].distance));
    assert_eq!(results[0].metadata.section.as_deref(), Some("Item 1A - Risk Factors"));

    let records = pipeline.indexer().indexed_documents("sec_filings").await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].chunk_count, stored);
}

fn chunk(id: &str, kind: ChunkKind, parent: Option<&str>, ticker: &str) -> Chunk {
    Chunk {
        id: id.to_string(),
        text: format!("text of {id}"),
        kind,
        parent_id: parent.map(str::to_string),
        metadata: ChunkMetadata {
            section: Some("Item 7 - MD&A".to_string()),
            ..ChunkMetadata::filing(ticker, "10-K", 2024)
        },
    }
}

fn unit(i: usize) -> Vec<f32> {
    let mut v = vec![0.0; DIMS];
    v[i] = 1.0;
    v
}

#[tokio::test]
async fn upsert_replaces_and_filters_apply() {
    let dir = TempDir::new().unwrap();
    let index = SqliteVectorIndex::open(dir.path()).await.unwrap();
    index.create_collection("c", DIMS).await.unwrap();

    let chunks = vec![
        chunk("P", ChunkKind::Parent, None, "AAPL"),
        chunk("P_CHILD_000", ChunkKind::Child, Some("P"), "AAPL"),
        chunk("Q", ChunkKind::Parent, None, "MSFT"),
    ];
    index.upsert("c", &chunks, &[unit(0), unit(1), unit(2)]).await.unwrap();
    index.upsert("c", &chunks[..1], &[unit(1)]).await.unwrap();
    assert_eq!(index.count("c", &MetadataFilter::new()).await.unwrap(), 3);

    let results =
        index.query("c", &unit(1), &MetadataFilter::new().ticker("aapl"), 10).await.unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.distance.abs() < 1e-6));
    assert_eq!(results[0].chunk_id, "P");
    assert_eq!(results[0].metadata.section.as_deref(), Some("Item 7 - MD&A"));

    let children =
        index.query("c", &unit(1), &MetadataFilter::new().parent_id("P"), 10).await.unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].kind, ChunkKind::Child);

    assert_eq!(index.delete("c", &MetadataFilter::new().ticker("AAPL")).await.unwrap(), 2);
    assert!(!index.exists("c", &MetadataFilter::new().ticker("AAPL")).await.unwrap());
    assert!(index.exists("c", &MetadataFilter::new().ticker("MSFT")).await.unwrap());
}

#[tokio::test]
async fn mismatched_upsert_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let index = SqliteVectorIndex::open(dir.path()).await.unwrap();
    index.create_collection("c", DIMS).await.unwrap();

    let chunks = vec![
        chunk("A", ChunkKind::Parent, None, "AAPL"),
        chunk("B", ChunkKind::Parent, None, "AAPL"),
    ];
    assert!(index.upsert("c", &chunks, &[unit(0)]).await.is_err());
    assert!(index.upsert("c", &chunks, &[unit(0), vec![1.0; DIMS - 1]]).await.is_err());
    assert_eq!(index.count("c", &MetadataFilter::new()).await.unwrap(), 0);
}

#[tokio::test]
async fn directory_with_uri_characters_opens() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("filings #1?mode=ro");

    let index = SqliteVectorIndex::open(&path).await.unwrap();
    index.upsert("c", &[chunk("A", ChunkKind::Parent, None, "AAPL")], &[unit(0)]).await.unwrap();
    index.close().await;

    assert!(path.join(finsight_rag::sqlite::DATABASE_FILE).is_file());
    let reopened = SqliteVectorIndex::open(&path).await.unwrap();
    assert_eq!(reopened.count("c", &MetadataFilter::new()).await.unwrap(), 1);
}

#[tokio::test]
async fn first_document_record_is_kept() {
    let dir = TempDir::new().unwrap();
    let index = SqliteVectorIndex::open(dir.path()).await.unwrap();
    let key = DocumentKey::filing("AAPL", "10-K", 2024);
    let first = IndexedDocumentRecord {
        key: key.clone(),
        collection: "sec_filings".into(),
        chunk_count: 12,
        failed_embeddings: 0,
        indexed_at: "2024-01-01T00:00:00Z".into(),
    };
    index.record_document(&first).await.unwrap();

    let rerun = IndexedDocumentRecord {
        chunk_count: 40,
        failed_embeddings: 3,
        indexed_at: "2025-06-30T00:00:00Z".into(),
        ..first.clone()
    };
    index.record_document(&rerun).await.unwrap();
    assert_eq!(index.document_records("sec_filings").await.unwrap(), vec![first]);

    assert!(index.remove_document_record("sec_filings", &key).await.unwrap());
    index.record_document(&rerun).await.unwrap();
    assert_eq!(index.document_records("sec_filings").await.unwrap(), vec![rerun]);
}
