//! Vector index trait for storing chunks and searching them by similarity.

use std::cmp::Ordering;

use async_trait::async_trait;

use crate::document::{Chunk, DocumentKey, IndexedDocumentRecord, MetadataFilter, QueryResult};
use crate::error::{RagError, Result};

/// A storage backend for chunk embeddings with metadata-filtered search.
///
/// Implementations manage named collections. Upserts replace chunks with the
/// same id and are all-or-nothing per call: either every chunk of the call is
/// stored or none is. Queries against a missing collection or a filter that
/// matches nothing return an empty `Vec`.
///
/// # Example
///
/// ```rust,ignore
/// use finsight_rag::{InMemoryVectorIndex, MetadataFilter, VectorIndex};
///
/// let index = InMemoryVectorIndex::new();
/// index.upsert("sec_filings", &chunks, &vectors).await?;
/// let filter = MetadataFilter::new().ticker("AAPL");
/// let results = index.query("sec_filings", &query_vector, &filter, 5).await?;
/// ```
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create a named collection. No-op if it already exists.
    async fn create_collection(&self, name: &str, dimensions: usize) -> Result<()>;

    /// Insert or replace `chunks` with their `vectors`, creating the collection if needed.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::VectorStoreError`] if the lengths differ, a vector has
    /// the wrong dimensionality, or the backend write fails.
    async fn upsert(&self, collection: &str, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<()>;

    /// Return up to `k` chunks matching `filter`, nearest first by cosine distance.
    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        filter: &MetadataFilter,
        k: usize,
    ) -> Result<Vec<QueryResult>>;

    /// Returns `true` if any chunk matches `filter`.
    async fn exists(&self, collection: &str, filter: &MetadataFilter) -> Result<bool>;

    /// Remove every chunk matching `filter` and return how many were removed.
    async fn delete(&self, collection: &str, filter: &MetadataFilter) -> Result<usize>;

    /// Number of chunks matching `filter`.
    async fn count(&self, collection: &str, filter: &MetadataFilter) -> Result<usize>;

    /// Store the record of a completed indexing run.
    ///
    /// The first record for a document wins; a later record for the same key
    /// is ignored until [`remove_document_record`](Self::remove_document_record).
    async fn record_document(&self, record: &IndexedDocumentRecord) -> Result<()>;

    /// Remove the record for `key`. Returns `true` if one existed.
    async fn remove_document_record(&self, collection: &str, key: &DocumentKey) -> Result<bool>;

    /// All indexing records of a collection.
    async fn document_records(&self, collection: &str) -> Result<Vec<IndexedDocumentRecord>>;

    /// Short backend name used in errors and logs.
    fn backend(&self) -> &str;
}

/// Check that an upsert call is well formed.
pub(crate) fn validate_upsert(
    backend: &str,
    chunks: &[Chunk],
    vectors: &[Vec<f32>],
    dimensions: Option<usize>,
) -> Result<()> {
    if chunks.len() != vectors.len() {
        return Err(RagError::VectorStoreError {
            backend: backend.to_string(),
            message: format!("{} chunks but {} vectors", chunks.len(), vectors.len()),
        });
    }
    let expected = dimensions.or_else(|| vectors.first().map(Vec::len));
    if let Some(expected) = expected {
        let mismatch = chunks.iter().zip(vectors).find(|(_, v)| v.len() != expected);
        if let Some((chunk, vector)) = mismatch {
            return Err(RagError::VectorStoreError {
                backend: backend.to_string(),
                message: format!(
                    "chunk '{}' has {} dimensions, expected {expected}",
                    chunk.id,
                    vector.len()
                ),
            });
        }
    }
    Ok(())
}

/// Cosine distance, `1 - cosine similarity`.
///
/// A zero-magnitude vector has similarity 0 with everything, so its distance is 1.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a * norm_b)
}

/// Sort ascending by distance, breaking ties by chunk id, and keep the first `k`.
pub(crate) fn nearest(mut results: Vec<QueryResult>, k: usize) -> Vec<QueryResult> {
    results.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    results.truncate(k);
    results
}
