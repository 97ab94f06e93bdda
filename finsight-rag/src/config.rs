//! Configuration for chunking, embedding, retrieval and storage.
//!
//! Every section has defaults, so an empty TOML document is a valid
//! configuration:
//!
//! ```toml
//! [chunking]
//! parent_size = 800
//! child_size = 400
//! overlap = 50
//!
//! [embedding]
//! batch_size = 100
//! max_concurrency = 4
//! cache_capacity = 1000
//!
//! [storage]
//! path = "./rag_index"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// Chunk sizing parameters. Sizes are in estimated tokens (1 token ≈ 4 chars).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Target size of a Parent (section summary) chunk.
    pub parent_size: usize,
    /// Target size of a Child (detail) chunk.
    pub child_size: usize,
    /// Overlap between consecutive Child chunks.
    pub overlap: usize,
    /// Target size of a news chunk.
    pub news_chunk_size: usize,
    /// Overlap used when an oversized news paragraph is split.
    pub news_overlap: usize,
    /// Sections shorter than this many characters are discarded as noise.
    pub min_section_chars: usize,
    /// Paragraphs shorter than this many characters are discarded.
    pub min_paragraph_chars: usize,
    /// How far past a window boundary to look for a sentence end, in characters.
    pub sentence_search_window: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            parent_size: 800,
            child_size: 400,
            overlap: 50,
            news_chunk_size: 300,
            news_overlap: 20,
            min_section_chars: 100,
            min_paragraph_chars: 50,
            sentence_search_window: 200,
        }
    }
}

/// Embedding batching, caching and timeout parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Number of texts sent to the provider per call.
    pub batch_size: usize,
    /// Maximum number of sub-batches in flight at once.
    pub max_concurrency: usize,
    /// Deadline for a single provider call.
    pub timeout_secs: u64,
    /// Number of query embeddings kept in the LRU cache. `0` disables caching.
    pub cache_capacity: usize,
    /// Dimensionality of the configured model's vectors.
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_concurrency: 4,
            timeout_secs: 30,
            cache_capacity: 1000,
            dimensions: 768,
        }
    }
}

impl EmbeddingConfig {
    /// The provider call deadline as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Two-stage retrieval parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Upper bound on Parent chunks fetched in the first pass.
    pub max_parents: usize,
    /// Lower bound on Child chunks fetched per Parent.
    pub min_children_per_parent: usize,
    /// Result count used when the caller does not pass one.
    pub default_results: usize,
    /// Deadline for a single index query.
    pub query_timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_parents: 5,
            min_children_per_parent: 2,
            default_results: 10,
            query_timeout_secs: 10,
        }
    }
}

impl RetrievalConfig {
    /// The index query deadline as a [`Duration`].
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }
}

/// Where the persistent index lives and how its collections are named.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the index database.
    pub path: PathBuf,
    /// Collection for structured filings.
    pub filings_collection: String,
    /// Collection for news articles.
    pub news_collection: String,
    /// Deadline for a single index write or existence check.
    pub write_timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./rag_index"),
            filings_collection: "sec_filings".to_string(),
            news_collection: "news_articles".to_string(),
            write_timeout_secs: 60,
        }
    }
}

impl StorageConfig {
    /// The index write deadline as a [`Duration`].
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RagConfig {
    /// Chunk sizing.
    pub chunking: ChunkingConfig,
    /// Embedding batching and caching.
    pub embedding: EmbeddingConfig,
    /// Hierarchical retrieval.
    pub retrieval: RetrievalConfig,
    /// Persistence.
    pub storage: StorageConfig,
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }

    /// Parse and validate a TOML document. Missing sections use defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: RagConfig = toml::from_str(content)
            .map_err(|e| RagError::ConfigError(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RagError::ConfigError(format!("failed to read config file {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Check that the parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        let chunking = &self.chunking;
        if chunking.parent_size == 0 || chunking.child_size == 0 || chunking.news_chunk_size == 0 {
            return Err(RagError::ConfigError("chunk sizes must be greater than zero".to_string()));
        }
        if chunking.overlap >= chunking.child_size {
            return Err(RagError::ConfigError(format!(
                "overlap ({}) must be less than child_size ({})",
                chunking.overlap, chunking.child_size
            )));
        }
        if chunking.news_overlap >= chunking.news_chunk_size {
            return Err(RagError::ConfigError(format!(
                "news_overlap ({}) must be less than news_chunk_size ({})",
                chunking.news_overlap, chunking.news_chunk_size
            )));
        }
        if self.embedding.batch_size == 0 {
            return Err(RagError::ConfigError("batch_size must be greater than zero".to_string()));
        }
        if self.embedding.max_concurrency == 0 {
            return Err(RagError::ConfigError(
                "max_concurrency must be greater than zero".to_string(),
            ));
        }
        if self.embedding.dimensions == 0 {
            return Err(RagError::ConfigError("dimensions must be greater than zero".to_string()));
        }
        if self.embedding.timeout_secs == 0
            || self.retrieval.query_timeout_secs == 0
            || self.storage.write_timeout_secs == 0
        {
            return Err(RagError::ConfigError("timeouts must be greater than zero".to_string()));
        }
        if self.retrieval.max_parents == 0 {
            return Err(RagError::ConfigError("max_parents must be greater than zero".to_string()));
        }
        if self.retrieval.default_results == 0 {
            return Err(RagError::ConfigError(
                "default_results must be greater than zero".to_string(),
            ));
        }
        let storage = &self.storage;
        if storage.filings_collection.is_empty() || storage.news_collection.is_empty() {
            return Err(RagError::ConfigError("collection names must not be empty".to_string()));
        }
        if storage.filings_collection == storage.news_collection {
            return Err(RagError::ConfigError(format!(
                "filings and news collections must differ (both are '{}')",
                storage.filings_collection
            )));
        }
        Ok(())
    }
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Set the Parent chunk size in tokens.
    pub fn parent_size(mut self, tokens: usize) -> Self {
        self.config.chunking.parent_size = tokens;
        self
    }

    /// Set the Child chunk size in tokens.
    pub fn child_size(mut self, tokens: usize) -> Self {
        self.config.chunking.child_size = tokens;
        self
    }

    /// Set the overlap between Child chunks in tokens.
    pub fn overlap(mut self, tokens: usize) -> Self {
        self.config.chunking.overlap = tokens;
        self
    }

    /// Set the news chunk size and overlap in tokens.
    pub fn news_chunking(mut self, size: usize, overlap: usize) -> Self {
        self.config.chunking.news_chunk_size = size;
        self.config.chunking.news_overlap = overlap;
        self
    }

    /// Set the minimum section length in characters.
    pub fn min_section_chars(mut self, chars: usize) -> Self {
        self.config.chunking.min_section_chars = chars;
        self
    }

    /// Set the embedding batch size.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.embedding.batch_size = size;
        self
    }

    /// Set the number of embedding sub-batches allowed in flight.
    pub fn max_concurrency(mut self, limit: usize) -> Self {
        self.config.embedding.max_concurrency = limit;
        self
    }

    /// Set the embedding call timeout.
    pub fn embedding_timeout(mut self, timeout: Duration) -> Self {
        self.config.embedding.timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// Set the query embedding cache capacity. `0` disables the cache.
    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.config.embedding.cache_capacity = capacity;
        self
    }

    /// Set the embedding dimensionality.
    pub fn dimensions(mut self, dims: usize) -> Self {
        self.config.embedding.dimensions = dims;
        self
    }

    /// Set the maximum number of Parent chunks fetched per query.
    pub fn max_parents(mut self, parents: usize) -> Self {
        self.config.retrieval.max_parents = parents;
        self
    }

    /// Set the index query timeout.
    pub fn query_timeout(mut self, timeout: Duration) -> Self {
        self.config.retrieval.query_timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// Set the result count used when a query does not pass one.
    pub fn default_results(mut self, n: usize) -> Self {
        self.config.retrieval.default_results = n;
        self
    }

    /// Set the index write and existence-check timeout.
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.config.storage.write_timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// Set the directory holding the persistent index.
    pub fn storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.storage.path = path.into();
        self
    }

    /// Set the filings and news collection names.
    pub fn collections(mut self, filings: impl Into<String>, news: impl Into<String>) -> Self {
        self.config.storage.filings_collection = filings.into();
        self.config.storage.news_collection = news.into();
        self
    }

    /// Build the [`RagConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if any constraint checked by
    /// [`RagConfig::validate`] is violated.
    pub fn build(self) -> Result<RagConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = RagConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chunking.parent_size, 800);
        assert_eq!(config.embedding.dimensions, 768);
        assert_eq!(config.storage.filings_collection, "sec_filings");
    }

    #[test]
    fn overlap_must_be_smaller_than_child_size() {
        let err = RagConfig::builder().child_size(100).overlap(100).build().unwrap_err();
        assert!(matches!(err, RagError::ConfigError(msg) if msg.contains("overlap")));
    }

    #[test]
    fn zero_batch_size_rejected() {
        assert!(RagConfig::builder().batch_size(0).build().is_err());
    }

    #[test]
    fn zero_default_results_rejected() {
        let err = RagConfig::builder().default_results(0).build().unwrap_err();
        assert!(matches!(err, RagError::ConfigError(msg) if msg.contains("default_results")));
    }

    #[test]
    fn identical_collections_rejected() {
        assert!(RagConfig::builder().collections("docs", "docs").build().is_err());
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let config = RagConfig::from_toml_str(
            r#"
            [chunking]
            child_size = 200
            overlap = 20

            [storage]
            path = "/tmp/finsight"
            "#,
        )
        .unwrap();
        assert_eq!(config.chunking.child_size, 200);
        assert_eq!(config.chunking.parent_size, 800);
        assert_eq!(config.storage.path, PathBuf::from("/tmp/finsight"));
        assert_eq!(config.retrieval.max_parents, 5);
    }

    #[test]
    fn invalid_toml_is_config_error() {
        let err = RagConfig::from_toml_str("[chunking]\nchild_size = \"big\"").unwrap_err();
        assert!(matches!(err, RagError::ConfigError(_)));
    }
}
