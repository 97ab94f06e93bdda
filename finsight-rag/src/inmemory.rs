//! In-memory vector index using cosine distance.
//!
//! This module provides [`InMemoryVectorIndex`], a vector index backed by
//! `HashMap`s protected by a `tokio::sync::RwLock`. It is suitable for
//! development, testing and small corpora that do not need to survive a restart.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::document::{Chunk, DocumentKey, IndexedDocumentRecord, MetadataFilter, QueryResult};
use crate::error::{RagError, Result};
use crate::vectorstore::{VectorIndex, cosine_distance, nearest, validate_upsert};

const BACKEND: &str = "InMemory";

#[derive(Debug, Default)]
struct Collection {
    dimensions: Option<usize>,
    entries: HashMap<String, (Chunk, Vec<f32>)>,
    records: HashMap<DocumentKey, IndexedDocumentRecord>,
}

/// An in-memory vector index.
///
/// Collections are stored as nested `HashMap`s: collection name → chunk id →
/// chunk and vector. An upsert holds the write lock for the whole call, so
/// concurrent readers never observe a partially stored document.
///
/// # Example
///
/// ```rust,ignore
/// use finsight_rag::{InMemoryVectorIndex, VectorIndex};
///
/// let index = InMemoryVectorIndex::new();
/// index.create_collection("sec_filings", 768).await?;
/// ```
#[derive(Debug, Default)]
pub struct InMemoryVectorIndex {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryVectorIndex {
    /// Create a new empty in-memory index.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn create_collection(&self, name: &str, dimensions: usize) -> Result<()> {
        let mut collections = self.collections.write().await;
        let collection = collections.entry(name.to_string()).or_default();
        collection.dimensions.get_or_insert(dimensions);
        Ok(())
    }

    async fn upsert(&self, collection: &str, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<()> {
        let mut collections = self.collections.write().await;
        let store = collections.entry(collection.to_string()).or_default();
        validate_upsert(BACKEND, chunks, vectors, store.dimensions)?;

        if store.dimensions.is_none() {
            store.dimensions = vectors.first().map(Vec::len);
        }
        for (chunk, vector) in chunks.iter().zip(vectors) {
            store.entries.insert(chunk.id.clone(), (chunk.clone(), vector.clone()));
        }
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        filter: &MetadataFilter,
        k: usize,
    ) -> Result<Vec<QueryResult>> {
        let collections = self.collections.read().await;
        let Some(store) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        if let Some(dims) = store.dimensions {
            if dims != vector.len() {
                return Err(RagError::VectorStoreError {
                    backend: BACKEND.to_string(),
                    message: format!(
                        "query vector has {} dimensions, collection '{collection}' expects {dims}",
                        vector.len()
                    ),
                });
            }
        }

        let scored = store
            .entries
            .values()
            .filter(|(chunk, _)| filter.matches(chunk))
            .map(|(chunk, stored)| QueryResult::from_chunk(chunk, cosine_distance(stored, vector)))
            .collect();
        Ok(nearest(scored, k))
    }

    async fn exists(&self, collection: &str, filter: &MetadataFilter) -> Result<bool> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .is_some_and(|store| store.entries.values().any(|(chunk, _)| filter.matches(chunk))))
    }

    async fn delete(&self, collection: &str, filter: &MetadataFilter) -> Result<usize> {
        let mut collections = self.collections.write().await;
        let Some(store) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = store.entries.len();
        store.entries.retain(|_, (chunk, _)| !filter.matches(chunk));
        Ok(before - store.entries.len())
    }

    async fn count(&self, collection: &str, filter: &MetadataFilter) -> Result<usize> {
        let collections = self.collections.read().await;
        Ok(collections.get(collection).map_or(0, |store| {
            store.entries.values().filter(|(chunk, _)| filter.matches(chunk)).count()
        }))
    }

    async fn record_document(&self, record: &IndexedDocumentRecord) -> Result<()> {
        let mut collections = self.collections.write().await;
        let store = collections.entry(record.collection.clone()).or_default();
        store.records.entry(record.key.clone()).or_insert_with(|| record.clone());
        Ok(())
    }

    async fn remove_document_record(&self, collection: &str, key: &DocumentKey) -> Result<bool> {
        let mut collections = self.collections.write().await;
        Ok(collections.get_mut(collection).is_some_and(|store| store.records.remove(key).is_some()))
    }

    async fn document_records(&self, collection: &str) -> Result<Vec<IndexedDocumentRecord>> {
        let collections = self.collections.read().await;
        let mut records: Vec<_> = collections
            .get(collection)
            .map(|store| store.records.values().cloned().collect())
            .unwrap_or_default();
        records.sort_by(|a, b| a.indexed_at.cmp(&b.indexed_at));
        Ok(records)
    }

    fn backend(&self) -> &str {
        BACKEND
    }
}
