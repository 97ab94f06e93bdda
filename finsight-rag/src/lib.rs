//! # finsight-rag
//!
//! Indexing and retrieval of long financial documents for language-model agents.
//!
//! ## Overview
//!
//! Filings and news articles are split into chunks, embedded and stored in a
//! vector index. Queries embed the question once and search the index:
//!
//! - [`HierarchicalChunker`] - splits 10-K style filings by item header into
//!   Parent (section summary) and Child (detail window) chunks
//! - [`ParagraphChunker`] - packs news paragraphs into flat chunks
//! - [`EmbeddingService`] - batching, caching and timeouts around an
//!   [`EmbeddingProvider`]
//! - [`VectorIndex`] - [`InMemoryVectorIndex`] or, with the `sqlite` feature,
//!   the persistent [`sqlite::SqliteVectorIndex`]
//! - [`Indexer`] - idempotent chunk → embed → store
//! - [`Retriever`] - hierarchical Parent/Child retrieval, flat search and
//!   per-collection multi-source search
//! - [`RagPipeline`] - wires the above together from a [`RagConfig`]
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use finsight_rag::{RagConfig, RagPipeline, gemini::GeminiEmbeddingProvider};
//!
//! let provider = Arc::new(GeminiEmbeddingProvider::from_env()?);
//! let pipeline = RagPipeline::open(RagConfig::load("rag.toml".as_ref())?, provider).await?;
//!
//! pipeline.indexer().index_document("AAPL", "10-K", 2024, &filing_text).await?;
//! let passages = pipeline
//!     .retriever()
//!     .query("supply chain concentration", "AAPL", Some("10-K"), None)
//!     .await?;
//! ```
//!
//! ## Features
//!
//! - `sqlite` (default) - persistent index in a SQLite database
//! - `gemini` - Gemini `text-embedding-004` provider

pub mod cache;
pub mod chunking;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
#[cfg(feature = "gemini")]
pub mod gemini;
pub mod indexer;
pub mod inmemory;
pub mod logging;
pub mod pipeline;
pub mod retrieval;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod vectorstore;

pub use cache::EmbeddingCache;
pub use chunking::{
    Chunker, HierarchicalChunker, ParagraphChunker, Section, SectionPattern, estimate_tokens,
    extract_paragraphs, extract_sections, sec_section_patterns, split_by_tokens,
};
pub use config::{
    ChunkingConfig, EmbeddingConfig, RagConfig, RagConfigBuilder, RetrievalConfig, StorageConfig,
};
pub use document::{
    Chunk, ChunkKind, ChunkMetadata, DocumentKey, FilingDocument, IndexedDocumentRecord,
    MetadataFilter, NewsArticle, QueryResult,
};
pub use embedding::{EmbeddedBatch, EmbeddingProvider, EmbeddingService};
pub use error::{RagError, Result};
#[cfg(feature = "gemini")]
pub use gemini::GeminiEmbeddingProvider;
pub use indexer::{IndexOutcome, Indexer, IndexerSettings};
pub use inmemory::InMemoryVectorIndex;
pub use pipeline::{RagPipeline, RagPipelineBuilder};
pub use retrieval::{Retriever, children_per_parent};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteVectorIndex;
pub use vectorstore::{VectorIndex, cosine_distance};
