//! Hierarchical, flat and multi-collection retrieval.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::RetrievalConfig;
use crate::document::{ChunkKind, MetadataFilter, QueryResult};
use crate::embedding::EmbeddingService;
use crate::error::{RagError, Result};
use crate::vectorstore::{VectorIndex, nearest};

/// Number of Child chunks to fetch for each of `parents` Parent chunks so that
/// the merged list can fill `n` results.
pub fn children_per_parent(n: usize, parents: usize, min_children: usize) -> usize {
    if parents == 0 {
        return 0;
    }
    min_children.max(n.saturating_sub(parents) / parents)
}

/// Executes queries against a [`VectorIndex`].
///
/// Hierarchical retrieval first finds the Parent chunks (section summaries)
/// nearest to the query, then the nearest Child chunks under each of those
/// parents, and returns the merged list sorted by distance. Fetching parents
/// first spreads the results across sections instead of letting the section
/// with the most chunks dominate.
///
/// Every index call is bounded by `query_timeout_secs`.
pub struct Retriever {
    embeddings: Arc<EmbeddingService>,
    index: Arc<dyn VectorIndex>,
    config: RetrievalConfig,
    filings_collection: String,
}

impl Retriever {
    pub fn new(
        embeddings: Arc<EmbeddingService>,
        index: Arc<dyn VectorIndex>,
        config: RetrievalConfig,
        filings_collection: impl Into<String>,
    ) -> Self {
        Self { embeddings, index, config, filings_collection: filings_collection.into() }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    fn query_timeout(&self) -> Duration {
        self.config.query_timeout()
    }

    async fn bounded<T>(
        &self,
        operation: &str,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let limit = self.query_timeout();
        timeout(limit, call).await.map_err(|_| RagError::timeout(operation, limit))?
    }

    /// Hierarchical search over the filings collection for one ticker.
    ///
    /// `doc_type` optionally narrows the search to one form type, e.g. `10-K`.
    /// `n` defaults to [`RetrievalConfig::default_results`]. Returns an empty
    /// list when the ticker has nothing indexed.
    pub async fn query(
        &self,
        query: &str,
        ticker: &str,
        doc_type: Option<&str>,
        n: Option<usize>,
    ) -> Result<Vec<QueryResult>> {
        let n = n.unwrap_or(self.config.default_results);
        let mut scope = MetadataFilter::new().ticker(ticker);
        if let Some(doc_type) = doc_type {
            scope = scope.doc_type(doc_type);
        }
        self.query_hierarchical(&self.filings_collection, query, &scope, n).await
    }

    /// Two-stage Parent/Child search within `scope`.
    ///
    /// # Errors
    ///
    /// Fails if the query cannot be embedded or the Parent pass fails. A failed
    /// Child query only drops that parent's children.
    pub async fn query_hierarchical(
        &self,
        collection: &str,
        query: &str,
        scope: &MetadataFilter,
        n: usize,
    ) -> Result<Vec<QueryResult>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let vector = self.embeddings.embed(query).await?;
        self.hierarchical_with_vector(collection, &vector, scope, n).await
    }

    async fn hierarchical_with_vector(
        &self,
        collection: &str,
        vector: &[f32],
        scope: &MetadataFilter,
        n: usize,
    ) -> Result<Vec<QueryResult>> {
        let parent_filter = scope.clone().kind(ChunkKind::Parent);
        let parent_k = self.config.max_parents.min(n);
        let parent_query = self.index.query(collection, vector, &parent_filter, parent_k);
        let parents = self.bounded("parent query", parent_query).await?;

        if parents.is_empty() {
            debug!(collection, "no parent chunks matched");
            return Ok(Vec::new());
        }

        let per_parent = children_per_parent(n, parents.len(), self.config.min_children_per_parent);
        let child_queries = parents.iter().map(|parent| {
            let filter = MetadataFilter::new().parent_id(parent.chunk_id.as_str());
            async move {
                let child_query = self.index.query(collection, vector, &filter, per_parent);
                let children = self.bounded("child query", child_query).await;
                (parent.chunk_id.as_str(), children)
            }
        });

        let mut merged = parents.clone();
        for (parent_id, children) in join_all(child_queries).await {
            match children {
                Ok(children) => {
                    merged.extend(children.into_iter().filter(|c| c.kind == ChunkKind::Child))
                }
                Err(e) => {
                    warn!(collection, parent_id, error = %e, "child query failed, skipping parent")
                }
            }
        }

        let results = nearest(merged, n);
        info!(
            collection,
            parents = parents.len(),
            results = results.len(),
            "hierarchical query complete"
        );
        Ok(results)
    }

    /// Single-pass nearest-neighbour search within `filter`.
    pub async fn query_flat(
        &self,
        collection: &str,
        query: &str,
        filter: &MetadataFilter,
        n: usize,
    ) -> Result<Vec<QueryResult>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let vector = self.embeddings.embed(query).await?;
        let results =
            self.bounded("flat query", self.index.query(collection, &vector, filter, n)).await?;
        info!(collection, results = results.len(), "flat query complete");
        Ok(results)
    }

    /// Search several collections independently with one query embedding.
    ///
    /// The filings collection is searched hierarchically and every other
    /// collection flat, all scoped to `ticker`. Each collection keeps its own
    /// ranking; scores are never compared across collections. A collection
    /// whose search fails is logged and maps to an empty list. `n` is per
    /// collection and defaults to [`RetrievalConfig::default_results`].
    pub async fn query_multi_source(
        &self,
        query: &str,
        ticker: &str,
        collections: &[&str],
        n: Option<usize>,
    ) -> Result<BTreeMap<String, Vec<QueryResult>>> {
        let n = n.unwrap_or(self.config.default_results);
        if n == 0 || collections.is_empty() {
            return Ok(collections.iter().map(|c| (c.to_string(), Vec::new())).collect());
        }
        let vector = self.embeddings.embed(query).await?;
        let scope = MetadataFilter::new().ticker(ticker);

        let searches = collections.iter().map(|collection| {
            let (vector, scope) = (&vector, &scope);
            async move {
                let results = if *collection == self.filings_collection {
                    self.hierarchical_with_vector(collection, vector, scope, n).await
                } else {
                    self.bounded("flat query", self.index.query(collection, vector, scope, n)).await
                };
                (*collection, results)
            }
        });

        let mut by_collection = BTreeMap::new();
        for (collection, results) in join_all(searches).await {
            let results = results.unwrap_or_else(|e| {
                warn!(collection, error = %e, "collection search failed");
                Vec::new()
            });
            by_collection.insert(collection.to_string(), results);
        }
        Ok(by_collection)
    }
}
