//! Embedding provider trait and the batching service built on it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::cache::EmbeddingCache;
use crate::config::EmbeddingConfig;
use crate::error::{RagError, Result};

/// A provider that generates vector embeddings from text input.
///
/// Implementations wrap specific embedding backends behind a unified async
/// interface. The default [`embed_batch`](EmbeddingProvider::embed_batch)
/// implementation calls [`embed`](EmbeddingProvider::embed) sequentially;
/// backends that support native batching should override it.
///
/// # Example
///
/// ```rust,ignore
/// use finsight_rag::EmbeddingProvider;
///
/// let provider = MyEmbeddingProvider::new();
/// let embedding = provider.embed("net revenue by segment").await?;
/// assert_eq!(embedding.len(), provider.dimensions());
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for a single text input.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate an embedding for a search query.
    ///
    /// Models with asymmetric retrieval modes embed queries differently from
    /// the documents they are matched against. Defaults to [`embed`](EmbeddingProvider::embed).
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(text).await
    }

    /// Generate embedding vectors for a batch of text inputs, in input order.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Return the dimensionality of embeddings produced by this provider.
    fn dimensions(&self) -> usize;

    /// Short backend name used in errors and logs.
    fn name(&self) -> &str {
        "custom"
    }
}

/// Output of [`EmbeddingService::embed_batch`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbeddedBatch {
    /// One vector per input text, in input order.
    pub vectors: Vec<Vec<f32>>,
    /// Inputs that received a zero vector because their sub-batch failed.
    pub failed_items: usize,
    /// Number of failed sub-batches.
    pub failed_batches: usize,
}

impl EmbeddedBatch {
    pub fn is_degraded(&self) -> bool {
        self.failed_items > 0
    }
}

/// Wraps an [`EmbeddingProvider`] with input validation, a query cache,
/// per-call timeouts and bounded-concurrency batching.
///
/// Batch embedding never fails as a whole: a sub-batch whose provider call
/// errors, times out or returns malformed output is replaced by zero vectors
/// of the configured dimensionality and counted in
/// [`EmbeddedBatch::failed_items`].
pub struct EmbeddingService {
    provider: Arc<dyn EmbeddingProvider>,
    cache: Arc<EmbeddingCache>,
    max_concurrency: usize,
    timeout: Duration,
}

impl fmt::Debug for EmbeddingService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddingService")
            .field("provider", &self.provider.name())
            .field("dimensions", &self.provider.dimensions())
            .field("max_concurrency", &self.max_concurrency)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl EmbeddingService {
    /// Create a service with a fresh cache sized by `config.cache_capacity`.
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: &EmbeddingConfig) -> Self {
        Self {
            provider,
            cache: Arc::new(EmbeddingCache::new(config.cache_capacity)),
            max_concurrency: config.max_concurrency.max(1),
            timeout: config.timeout(),
        }
    }

    /// Replace the query cache, e.g. to share one between services.
    pub fn with_cache(mut self, cache: Arc<EmbeddingCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    /// Embed a search query, consulting the cache first.
    ///
    /// Uses [`EmbeddingProvider::embed_query`]; document chunks go through
    /// [`embed_batch`](Self::embed_batch).
    ///
    /// # Errors
    ///
    /// - [`RagError::EmptyInput`] for empty or whitespace-only text, before any provider call
    /// - [`RagError::Timeout`] if the provider does not answer in time
    /// - [`RagError::EmbeddingError`] if the provider fails or returns the wrong dimensionality
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(RagError::EmptyInput);
        }

        if let Some(vector) = self.cache.get(text).await {
            debug!(provider = self.provider.name(), "embedding cache hit");
            return Ok(vector);
        }

        let vector = timeout(self.timeout, self.provider.embed_query(text))
            .await
            .map_err(|_| self.timed_out("embed"))??;

        let dims = self.dimensions();
        if vector.len() != dims {
            return Err(RagError::EmbeddingError {
                provider: self.provider.name().to_string(),
                message: format!("expected {dims} dimensions, got {}", vector.len()),
            });
        }

        self.cache.insert(text, vector.clone()).await;
        Ok(vector)
    }

    /// Embed `texts` in sub-batches of `batch_size`, running up to
    /// `max_concurrency` sub-batches at once. Output order matches input order.
    pub async fn embed_batch(&self, texts: &[String], batch_size: usize) -> EmbeddedBatch {
        if texts.is_empty() {
            return EmbeddedBatch::default();
        }
        let batch_size = batch_size.max(1);
        let dims = self.dimensions();

        let results: Vec<(Vec<Vec<f32>>, bool)> = stream::iter(texts.chunks(batch_size).enumerate())
            .map(|(index, batch)| async move {
                match self.embed_sub_batch(batch, dims).await {
                    Ok(vectors) => (vectors, false),
                    Err(e) => {
                        warn!(
                            provider = self.provider.name(),
                            batch = index,
                            size = batch.len(),
                            error = %e,
                            "embedding sub-batch failed, substituting zero vectors"
                        );
                        (vec![vec![0.0; dims]; batch.len()], true)
                    }
                }
            })
            .buffered(self.max_concurrency)
            .collect()
            .await;

        let mut embedded =
            EmbeddedBatch { vectors: Vec::with_capacity(texts.len()), ..Default::default() };
        for (vectors, failed) in results {
            if failed {
                embedded.failed_batches += 1;
                embedded.failed_items += vectors.len();
            }
            embedded.vectors.extend(vectors);
        }

        info!(
            provider = self.provider.name(),
            texts = texts.len(),
            failed_items = embedded.failed_items,
            "embedded batch"
        );
        embedded
    }

    fn timed_out(&self, call: &str) -> RagError {
        RagError::timeout(format!("{} {call}", self.provider.name()), self.timeout)
    }

    async fn embed_sub_batch(&self, batch: &[String], dims: usize) -> Result<Vec<Vec<f32>>> {
        let refs: Vec<&str> = batch.iter().map(String::as_str).collect();
        let vectors = timeout(self.timeout, self.provider.embed_batch(&refs))
            .await
            .map_err(|_| self.timed_out("embed_batch"))??;

        if vectors.len() != batch.len() || vectors.iter().any(|v| v.len() != dims) {
            return Err(RagError::EmbeddingError {
                provider: self.provider.name().to_string(),
                message: format!(
                    "expected {} vectors of {dims} dimensions, got {}",
                    batch.len(),
                    vectors.len()
                ),
            });
        }
        Ok(vectors)
    }
}
