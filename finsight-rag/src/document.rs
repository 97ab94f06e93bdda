//! Data types for source documents, chunks, filters and query results.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Granularity of a [`Chunk`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    /// A short section summary.
    Parent,
    /// A detailed window over a section, or a flat chunk with no hierarchy.
    Child,
}

impl ChunkKind {
    /// The lowercase name used in storage.
    pub fn as_str(self) -> &'static str {
        match self {
            ChunkKind::Parent => "parent",
            ChunkKind::Child => "child",
        }
    }

    /// Parse the storage name back into a kind.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "parent" => Some(ChunkKind::Parent),
            "child" => Some(ChunkKind::Child),
            _ => None,
        }
    }
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed metadata attached to every stored chunk.
///
/// Filings populate `ticker`, `doc_type`, `year` and `section`; news articles
/// populate `source`, `article_id`, `title`, `url` and `published_date`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChunkMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    /// Byte offset of the section header in the source text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_position: Option<usize>,
    /// Position of this chunk within its section (or document, for flat chunks).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub article_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_date: Option<String>,
    /// RFC 3339 timestamp set when the chunk was stored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexed_at: Option<String>,
}

impl ChunkMetadata {
    /// Metadata for a structured filing.
    pub fn filing(ticker: &str, doc_type: &str, year: i32) -> Self {
        Self {
            ticker: Some(ticker.to_uppercase()),
            doc_type: Some(doc_type.to_string()),
            year: Some(year),
            ..Default::default()
        }
    }

    /// Metadata for a news article.
    pub fn news(source: &str, article_id: &str) -> Self {
        Self {
            source: Some(source.to_string()),
            article_id: Some(article_id.to_string()),
            ..Default::default()
        }
    }
}

/// A unit of retrievable text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Unique within its collection.
    pub id: String,
    pub text: String,
    pub kind: ChunkKind,
    /// Id of the owning Parent chunk. Always `None` for Parent chunks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub metadata: ChunkMetadata,
}

/// Exact-match predicate over a subset of chunk fields.
///
/// Unset fields match anything, so the default filter matches every chunk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MetadataFilter {
    pub ticker: Option<String>,
    pub doc_type: Option<String>,
    pub year: Option<i32>,
    pub section: Option<String>,
    pub kind: Option<ChunkKind>,
    pub parent_id: Option<String>,
    pub source: Option<String>,
    pub article_id: Option<String>,
}

impl MetadataFilter {
    /// A filter that matches every chunk.
    pub fn new() -> Self {
        Self::default()
    }

    /// Match a ticker. The value is upper-cased.
    pub fn ticker(mut self, ticker: impl AsRef<str>) -> Self {
        self.ticker = Some(ticker.as_ref().to_uppercase());
        self
    }

    pub fn doc_type(mut self, doc_type: impl Into<String>) -> Self {
        self.doc_type = Some(doc_type.into());
        self
    }

    pub fn year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    pub fn section(mut self, section: impl Into<String>) -> Self {
        self.section = Some(section.into());
        self
    }

    pub fn kind(mut self, kind: ChunkKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn parent_id(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn article_id(mut self, article_id: impl Into<String>) -> Self {
        self.article_id = Some(article_id.into());
        self
    }

    /// Returns `true` if no field is constrained.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Returns `true` if every constrained field equals the chunk's value.
    pub fn matches(&self, chunk: &Chunk) -> bool {
        fn eq<T: PartialEq>(want: &Option<T>, have: Option<&T>) -> bool {
            match want {
                Some(want) => have == Some(want),
                None => true,
            }
        }

        let meta = &chunk.metadata;
        eq(&self.ticker, meta.ticker.as_ref())
            && eq(&self.doc_type, meta.doc_type.as_ref())
            && eq(&self.year, meta.year.as_ref())
            && eq(&self.section, meta.section.as_ref())
            && eq(&self.kind, Some(&chunk.kind))
            && eq(&self.parent_id, chunk.parent_id.as_ref())
            && eq(&self.source, meta.source.as_ref())
            && eq(&self.article_id, meta.article_id.as_ref())
    }
}

/// A retrieved chunk with its distance to the query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryResult {
    pub chunk_id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    pub kind: ChunkKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Cosine distance; lower is more similar.
    pub distance: f32,
}

impl QueryResult {
    /// Build a result from a stored chunk.
    pub fn from_chunk(chunk: &Chunk, distance: f32) -> Self {
        Self {
            chunk_id: chunk.id.clone(),
            text: chunk.text.clone(),
            metadata: chunk.metadata.clone(),
            kind: chunk.kind,
            parent_id: chunk.parent_id.clone(),
            distance,
        }
    }

    /// Similarity in `[-1, 1]`, i.e. `1 - distance`.
    pub fn relevance(&self) -> f32 {
        1.0 - self.distance
    }
}

/// Identity of one logical document in the index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DocumentKey {
    /// A structured filing, e.g. a company's 10-K for one fiscal year.
    Filing { ticker: String, doc_type: String, year: i32 },
    /// A news article from a named source.
    News { source: String, article_id: String },
}

impl DocumentKey {
    /// Key for a filing. The ticker is upper-cased.
    pub fn filing(ticker: &str, doc_type: &str, year: i32) -> Self {
        DocumentKey::Filing { ticker: ticker.to_uppercase(), doc_type: doc_type.to_string(), year }
    }

    /// Key for a news article.
    pub fn news(source: &str, article_id: &str) -> Self {
        DocumentKey::News { source: source.to_string(), article_id: article_id.to_string() }
    }

    /// Filter selecting every chunk of this document.
    pub fn filter(&self) -> MetadataFilter {
        match self {
            DocumentKey::Filing { ticker, doc_type, year } => {
                MetadataFilter::new().ticker(ticker).doc_type(doc_type.as_str()).year(*year)
            }
            DocumentKey::News { source, article_id } => {
                MetadataFilter::new().source(source.as_str()).article_id(article_id.as_str())
            }
        }
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentKey::Filing { ticker, doc_type, year } => {
                write!(f, "{ticker} {doc_type} {year}")
            }
            DocumentKey::News { source, article_id } => write!(f, "{source}/{article_id}"),
        }
    }
}

/// Proof that a document was fully chunked, embedded and stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexedDocumentRecord {
    pub key: DocumentKey,
    pub collection: String,
    pub chunk_count: usize,
    /// Chunks stored with a zero vector because their embedding sub-batch failed.
    pub failed_embeddings: usize,
    pub indexed_at: String,
}

/// A filing whose text has already been extracted from its envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilingDocument {
    pub ticker: String,
    /// Form type, e.g. `10-K`.
    pub doc_type: String,
    pub year: i32,
    pub text: String,
}

impl FilingDocument {
    pub fn new(ticker: &str, doc_type: &str, year: i32, text: impl Into<String>) -> Self {
        Self {
            ticker: ticker.to_uppercase(),
            doc_type: doc_type.to_string(),
            year,
            text: text.into(),
        }
    }

    pub fn key(&self) -> DocumentKey {
        DocumentKey::filing(&self.ticker, &self.doc_type, self.year)
    }
}

/// A news article as supplied by a fetcher.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NewsArticle {
    pub title: String,
    /// Plain text or HTML with `<p>` paragraphs.
    pub content: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub published_date: Option<String>,
    pub source: String,
    #[serde(default)]
    pub ticker: Option<String>,
    /// Stable id from the source. Derived from the URL or content when absent.
    #[serde(default)]
    pub article_id: Option<String>,
}
