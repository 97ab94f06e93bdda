//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use finsight_rag::{
    Chunk, ChunkKind, DocumentKey, EmbeddingProvider, InMemoryVectorIndex, IndexedDocumentRecord,
    MetadataFilter, QueryResult, RagConfig, RagError, RagPipeline, Result, VectorIndex,
};

pub const DIMS: usize = 64;

/// Deterministic bag-of-words embedder. Each lowercased word is hashed into
/// one of [`DIMS`] buckets and the counts are L2-normalized, so texts sharing
/// vocabulary end up close together.
#[derive(Default)]
pub struct BagOfWordsEmbedder {
    /// Number of texts embedded so far.
    pub texts_embedded: AtomicUsize,
    /// Any text containing this marker fails to embed.
    pub fail_marker: Option<&'static str>,
}

impl BagOfWordsEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(marker: &'static str) -> Self {
        Self { fail_marker: Some(marker), ..Self::default() }
    }

    pub fn calls(&self) -> usize {
        self.texts_embedded.load(Ordering::SeqCst)
    }
}

pub fn bag_of_words(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; DIMS];
    for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
        let mut hasher = DefaultHasher::new();
        word.to_lowercase().hash(&mut hasher);
        vector[(hasher.finish() % DIMS as u64) as usize] += 1.0;
    }
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }
    vector
}

#[async_trait]
impl EmbeddingProvider for BagOfWordsEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.texts_embedded.fetch_add(1, Ordering::SeqCst);
        if let Some(marker) = self.fail_marker {
            if text.contains(marker) {
                return Err(RagError::EmbeddingError {
                    provider: "bag-of-words".to_string(),
                    message: format!("refusing text containing {marker}"),
                });
            }
        }
        Ok(bag_of_words(text))
    }

    fn dimensions(&self) -> usize {
        DIMS
    }

    fn name(&self) -> &str {
        "bag-of-words"
    }
}

pub fn test_config() -> RagConfig {
    RagConfig::builder().dimensions(DIMS).batch_size(4).build().expect("valid test config")
}

pub fn in_memory_pipeline(provider: Arc<BagOfWordsEmbedder>) -> RagPipeline {
    pipeline_with(provider, Arc::new(InMemoryVectorIndex::new()))
}

pub fn pipeline_with(
    provider: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
) -> RagPipeline {
    finsight_rag::logging::init();
    RagPipeline::builder()
        .config(test_config())
        .embedding_provider(provider)
        .vector_index(index)
        .build()
        .expect("pipeline builds")
}

/// Bag-of-words embedder that hangs on any text containing `marker`.
pub struct SlowEmbedder {
    inner: BagOfWordsEmbedder,
    marker: &'static str,
    delay: Duration,
}

impl SlowEmbedder {
    /// Sleeps for an hour, far past every configured timeout.
    pub fn stalling_on(marker: &'static str) -> Self {
        Self { inner: BagOfWordsEmbedder::new(), marker, delay: Duration::from_secs(3600) }
    }
}

#[async_trait]
impl EmbeddingProvider for SlowEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.contains(self.marker) {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.embed(text).await
    }

    fn dimensions(&self) -> usize {
        DIMS
    }

    fn name(&self) -> &str {
        "slow"
    }
}

/// An [`InMemoryVectorIndex`] with switchable write failures and stalls.
#[derive(Default)]
pub struct FlakyIndex {
    inner: InMemoryVectorIndex,
    /// Every upsert fails while set.
    pub fail_upserts: AtomicBool,
    /// Every upsert hangs while set.
    pub stall_upserts: AtomicBool,
    /// Parent-pass queries hang while set.
    pub stall_parent_queries: AtomicBool,
    /// Child queries under a parent whose id contains this fail.
    failing_children_of: Option<&'static str>,
    pub upserts_attempted: AtomicUsize,
}

impl FlakyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_children_of(parent_id_part: &'static str) -> Self {
        Self { failing_children_of: Some(parent_id_part), ..Self::default() }
    }

    fn injected(message: &str) -> RagError {
        RagError::VectorStoreError { backend: "flaky".to_string(), message: message.to_string() }
    }

    async fn stall() {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}

#[async_trait]
impl VectorIndex for FlakyIndex {
    async fn create_collection(&self, name: &str, dimensions: usize) -> Result<()> {
        self.inner.create_collection(name, dimensions).await
    }

    async fn upsert(&self, collection: &str, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<()> {
        self.upserts_attempted.fetch_add(1, Ordering::SeqCst);
        if self.stall_upserts.load(Ordering::SeqCst) {
            Self::stall().await;
        }
        if self.fail_upserts.load(Ordering::SeqCst) {
            return Err(Self::injected("disk full"));
        }
        self.inner.upsert(collection, chunks, vectors).await
    }

    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        filter: &MetadataFilter,
        k: usize,
    ) -> Result<Vec<QueryResult>> {
        if filter.kind == Some(ChunkKind::Parent)
            && self.stall_parent_queries.load(Ordering::SeqCst)
        {
            Self::stall().await;
        }
        if let (Some(part), Some(parent_id)) = (self.failing_children_of, &filter.parent_id) {
            if parent_id.contains(part) {
                return Err(Self::injected("child query rejected"));
            }
        }
        self.inner.query(collection, vector, filter, k).await
    }

    async fn exists(&self, collection: &str, filter: &MetadataFilter) -> Result<bool> {
        self.inner.exists(collection, filter).await
    }

    async fn delete(&self, collection: &str, filter: &MetadataFilter) -> Result<usize> {
        self.inner.delete(collection, filter).await
    }

    async fn count(&self, collection: &str, filter: &MetadataFilter) -> Result<usize> {
        self.inner.count(collection, filter).await
    }

    async fn record_document(&self, record: &IndexedDocumentRecord) -> Result<()> {
        self.inner.record_document(record).await
    }

    async fn remove_document_record(&self, collection: &str, key: &DocumentKey) -> Result<bool> {
        self.inner.remove_document_record(collection, key).await
    }

    async fn document_records(&self, collection: &str) -> Result<Vec<IndexedDocumentRecord>> {
        self.inner.document_records(collection).await
    }

    fn backend(&self) -> &str {
        "flaky"
    }
}

fn paragraph(topic: &str, sentences: usize) -> String {
    (0..sentences)
        .map(|i| format!("The company reports {topic} detail number {i} for the fiscal year. "))
        .collect()
}

/// A 10-K body with Business, Risk Factors and MD&A sections.
pub fn three_section_filing() -> String {
    format!(
        "ANNUAL REPORT\n\nItem 1. Business\n\n{}\n\nItem 1A. Risk Factors\n\n{}\n\n\
         Item 7. Management's Discussion and Analysis\n\n{}",
        paragraph("smartphone hardware sales", 30),
        paragraph("supply chain concentration risk", 30),
        paragraph("operating margin revenue growth", 30),
    )
}
