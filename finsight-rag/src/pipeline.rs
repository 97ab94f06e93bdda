//! RAG pipeline wiring.
//!
//! The [`RagPipeline`] constructs the shared services once (embedding
//! service, vector index, chunkers) and hands the same instances to its
//! [`Indexer`] and [`Retriever`].
//!
//! # Example
//!
//! ```rust,ignore
//! use finsight_rag::{InMemoryVectorIndex, RagConfig, RagPipeline};
//!
//! let pipeline = RagPipeline::builder()
//!     .config(RagConfig::default())
//!     .embedding_provider(Arc::new(my_embedder))
//!     .vector_index(Arc::new(InMemoryVectorIndex::new()))
//!     .build()?;
//!
//! pipeline.indexer().index_document("AAPL", "10-K", 2024, &filing_text).await?;
//! let results = pipeline.retriever().query("supply chain risks", "AAPL", None, Some(10)).await?;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{error, info};

use crate::cache::EmbeddingCache;
use crate::chunking::{Chunker, HierarchicalChunker, ParagraphChunker};
use crate::config::RagConfig;
use crate::document::MetadataFilter;
use crate::embedding::{EmbeddingProvider, EmbeddingService};
use crate::error::{RagError, Result};
use crate::indexer::{Indexer, IndexerSettings};
use crate::retrieval::Retriever;
use crate::vectorstore::VectorIndex;

/// The assembled indexing and retrieval services.
///
/// Construct one via [`RagPipeline::builder()`].
pub struct RagPipeline {
    config: RagConfig,
    embeddings: Arc<EmbeddingService>,
    index: Arc<dyn VectorIndex>,
    indexer: Indexer,
    retriever: Retriever,
}

impl RagPipeline {
    /// Create a new [`RagPipelineBuilder`].
    pub fn builder() -> RagPipelineBuilder {
        RagPipelineBuilder::default()
    }

    /// Build a pipeline backed by the SQLite index under `config.storage.path`.
    #[cfg(feature = "sqlite")]
    pub async fn open(config: RagConfig, provider: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let index = crate::sqlite::SqliteVectorIndex::open(&config.storage.path).await?;
        Self::builder()
            .config(config)
            .embedding_provider(provider)
            .vector_index(Arc::new(index))
            .build()
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn indexer(&self) -> &Indexer {
        &self.indexer
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub fn embeddings(&self) -> &Arc<EmbeddingService> {
        &self.embeddings
    }

    pub fn vector_index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    /// Create the filings and news collections with the provider's dimensionality.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::PipelineError`] if the vector index operation fails.
    pub async fn create_collections(&self) -> Result<()> {
        let dimensions = self.embeddings.dimensions();
        let storage = &self.config.storage;
        for name in [&storage.filings_collection, &storage.news_collection] {
            self.index.create_collection(name, dimensions).await.map_err(|e| {
                error!(collection = %name, error = %e, "failed to create collection");
                RagError::PipelineError(format!("failed to create collection '{name}': {e}"))
            })?;
        }
        Ok(())
    }

    /// Chunk counts per configured collection.
    pub async fn stats(&self) -> Result<BTreeMap<String, usize>> {
        let storage = &self.config.storage;
        let mut stats = BTreeMap::new();
        for name in [&storage.filings_collection, &storage.news_collection] {
            let count = self.index.count(name, &MetadataFilter::new()).await?;
            stats.insert(name.clone(), count);
        }
        Ok(stats)
    }
}

/// Builder for constructing a [`RagPipeline`].
///
/// The embedding provider and vector index are required. Chunkers default to
/// [`HierarchicalChunker`] for filings and [`ParagraphChunker`] for news, and
/// the query cache defaults to an [`EmbeddingCache`] sized by the config.
#[derive(Default)]
pub struct RagPipelineBuilder {
    config: Option<RagConfig>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    vector_index: Option<Arc<dyn VectorIndex>>,
    filing_chunker: Option<Arc<dyn Chunker>>,
    news_chunker: Option<Arc<dyn Chunker>>,
    cache: Option<Arc<EmbeddingCache>>,
}

impl RagPipelineBuilder {
    /// Set the configuration. Defaults to [`RagConfig::default()`].
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    pub fn vector_index(mut self, index: Arc<dyn VectorIndex>) -> Self {
        self.vector_index = Some(index);
        self
    }

    /// Override the chunker used for filings.
    pub fn filing_chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.filing_chunker = Some(chunker);
        self
    }

    /// Override the chunker used for news articles.
    pub fn news_chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.news_chunker = Some(chunker);
        self
    }

    /// Use a specific query embedding cache.
    pub fn cache(mut self, cache: Arc<EmbeddingCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Build the pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if a required component is missing,
    /// the configuration is invalid, or the provider's dimensionality differs
    /// from `embedding.dimensions`.
    pub fn build(self) -> Result<RagPipeline> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let provider = self
            .embedding_provider
            .ok_or_else(|| RagError::ConfigError("embedding_provider is required".to_string()))?;
        let index = self
            .vector_index
            .ok_or_else(|| RagError::ConfigError("vector_index is required".to_string()))?;

        if provider.dimensions() != config.embedding.dimensions {
            return Err(RagError::ConfigError(format!(
                "provider '{}' produces {} dimensions but config expects {}",
                provider.name(),
                provider.dimensions(),
                config.embedding.dimensions
            )));
        }

        let mut service = EmbeddingService::new(provider, &config.embedding);
        if let Some(cache) = self.cache {
            service = service.with_cache(cache);
        }
        let embeddings = Arc::new(service);

        let filing_chunker = self.filing_chunker.unwrap_or_else(|| {
            Arc::new(HierarchicalChunker::new(&config.chunking)) as Arc<dyn Chunker>
        });
        let news_chunker = self.news_chunker.unwrap_or_else(|| {
            Arc::new(ParagraphChunker::new(&config.chunking)) as Arc<dyn Chunker>
        });

        let storage = &config.storage;
        let indexer = Indexer::new(
            embeddings.clone(),
            index.clone(),
            filing_chunker,
            news_chunker,
            IndexerSettings {
                batch_size: config.embedding.batch_size,
                write_timeout: storage.write_timeout(),
                filings_collection: storage.filings_collection.clone(),
                news_collection: storage.news_collection.clone(),
            },
        );
        let retriever = Retriever::new(
            embeddings.clone(),
            index.clone(),
            config.retrieval.clone(),
            storage.filings_collection.clone(),
        );

        info!(
            provider = embeddings.provider_name(),
            backend = index.backend(),
            dimensions = embeddings.dimensions(),
            "built RAG pipeline"
        );
        Ok(RagPipeline { config, embeddings, index, indexer, retriever })
    }
}
