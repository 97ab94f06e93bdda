//! Idempotent ingestion of filings and news articles.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::chunking::{Chunker, content_hash};
use crate::document::{
    Chunk, ChunkMetadata, DocumentKey, FilingDocument, IndexedDocumentRecord, NewsArticle,
};
use crate::embedding::EmbeddingService;
use crate::error::{RagError, Result};
use crate::vectorstore::VectorIndex;

/// Result of a successful indexing call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    /// The document was already present; nothing was chunked or embedded.
    AlreadyIndexed,
    /// The document was chunked, embedded and stored.
    Indexed {
        /// Number of chunks stored.
        chunks: usize,
        /// Chunks stored with a zero vector after their embedding sub-batch failed.
        failed_embeddings: usize,
    },
}

/// Chunks, embeds and stores documents, skipping documents already indexed.
///
/// The existence check and the store are not locked against each other, so
/// two callers indexing the same document at once may both do the work. The
/// resulting upserts carry the same deterministic ids and converge. A document
/// only counts as indexed once its single all-or-nothing upsert has committed.
pub struct Indexer {
    embeddings: Arc<EmbeddingService>,
    index: Arc<dyn VectorIndex>,
    filing_chunker: Arc<dyn Chunker>,
    news_chunker: Arc<dyn Chunker>,
    batch_size: usize,
    write_timeout: Duration,
    filings_collection: String,
    news_collection: String,
}

/// Collection names and limits used by an [`Indexer`].
#[derive(Debug, Clone)]
pub struct IndexerSettings {
    pub batch_size: usize,
    pub write_timeout: Duration,
    pub filings_collection: String,
    pub news_collection: String,
}

impl Indexer {
    pub fn new(
        embeddings: Arc<EmbeddingService>,
        index: Arc<dyn VectorIndex>,
        filing_chunker: Arc<dyn Chunker>,
        news_chunker: Arc<dyn Chunker>,
        settings: IndexerSettings,
    ) -> Self {
        Self {
            embeddings,
            index,
            filing_chunker,
            news_chunker,
            batch_size: settings.batch_size,
            write_timeout: settings.write_timeout,
            filings_collection: settings.filings_collection,
            news_collection: settings.news_collection,
        }
    }

    fn collection_for(&self, key: &DocumentKey) -> &str {
        match key {
            DocumentKey::Filing { .. } => &self.filings_collection,
            DocumentKey::News { .. } => &self.news_collection,
        }
    }

    async fn bounded<T>(
        &self,
        operation: &str,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        timeout(self.write_timeout, call)
            .await
            .map_err(|_| RagError::timeout(operation, self.write_timeout))?
    }

    /// Index a filing given as loose fields.
    pub async fn index_document(
        &self,
        ticker: &str,
        doc_type: &str,
        year: i32,
        raw_text: &str,
    ) -> Result<IndexOutcome> {
        self.index_filing(&FilingDocument::new(ticker, doc_type, year, raw_text)).await
    }

    /// Index a filing into the filings collection.
    ///
    /// # Errors
    ///
    /// - [`RagError::ChunkingError`] if the text produces no chunks
    /// - [`RagError::PipelineError`] if storing the chunks fails
    /// - [`RagError::Timeout`] if the existence check or the store does not finish in time
    /// - [`RagError::VectorStoreError`] if the existence check fails
    ///
    /// A document is never recorded as indexed after a failed or timed-out store.
    pub async fn index_filing(&self, filing: &FilingDocument) -> Result<IndexOutcome> {
        let key = filing.key();
        let metadata = ChunkMetadata::filing(&filing.ticker, &filing.doc_type, filing.year);
        self.ingest(key, &filing.text, metadata, self.filing_chunker.as_ref()).await
    }

    /// Index a news article into the news collection.
    ///
    /// Articles are identified by `(source, article_id)`. An article without an
    /// id is identified by a hash of its URL, or of its content if it has no URL.
    pub async fn index_news_article(&self, article: &NewsArticle) -> Result<IndexOutcome> {
        let source =
            if article.source.trim().is_empty() { "unknown" } else { article.source.trim() };
        let article_id = match &article.article_id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => {
                let basis = article
                    .url
                    .as_deref()
                    .filter(|u| !u.is_empty())
                    .unwrap_or(article.content.as_str());
                content_hash(basis)[..16].to_string()
            }
        };

        let metadata = ChunkMetadata {
            ticker: article.ticker.as_ref().map(|t| t.to_uppercase()),
            title: Some(article.title.clone()),
            url: article.url.clone(),
            published_date: article.published_date.clone(),
            ..ChunkMetadata::news(source, &article_id)
        };
        let text = format!("{}\n\n{}", article.title, article.content);
        let key = DocumentKey::news(source, &article_id);
        self.ingest(key, &text, metadata, self.news_chunker.as_ref()).await
    }

    /// Returns `true` if any chunk of the document is stored.
    pub async fn is_indexed(&self, key: &DocumentKey) -> Result<bool> {
        let collection = self.collection_for(key);
        self.bounded("existence check", self.index.exists(collection, &key.filter())).await
    }

    /// Remove every chunk of a document and its indexing record.
    /// Returns the number of chunks removed.
    pub async fn delete_document(&self, key: &DocumentKey) -> Result<usize> {
        let collection = self.collection_for(key);
        let removed = self.bounded("delete", self.index.delete(collection, &key.filter())).await?;
        self.bounded("delete record", self.index.remove_document_record(collection, key)).await?;
        info!(collection, document = %key, removed, "deleted document");
        Ok(removed)
    }

    /// Records of every fully indexed document in `collection`.
    pub async fn indexed_documents(&self, collection: &str) -> Result<Vec<IndexedDocumentRecord>> {
        self.bounded("list records", self.index.document_records(collection)).await
    }

    async fn ingest(
        &self,
        key: DocumentKey,
        text: &str,
        metadata: ChunkMetadata,
        chunker: &dyn Chunker,
    ) -> Result<IndexOutcome> {
        let collection = self.collection_for(&key);
        if self.is_indexed(&key).await? {
            info!(collection, document = %key, "already indexed, skipping");
            return Ok(IndexOutcome::AlreadyIndexed);
        }

        let indexed_at = Utc::now().to_rfc3339();
        let mut chunks: Vec<Chunk> = chunker.chunk(text, &metadata);
        if chunks.is_empty() {
            return Err(RagError::ChunkingError(format!("no chunks produced for {key}")));
        }
        for chunk in &mut chunks {
            chunk.metadata.indexed_at = Some(indexed_at.clone());
        }
        info!(collection, document = %key, chunks = chunks.len(), "chunked document");

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embedded = self.embeddings.embed_batch(&texts, self.batch_size).await;
        if embedded.is_degraded() {
            warn!(
                collection,
                document = %key,
                failed = embedded.failed_items,
                "storing chunks with zero vectors for failed embeddings"
            );
        }

        let upsert = self.index.upsert(collection, &chunks, &embedded.vectors);
        if let Err(e) = self.bounded("upsert", upsert).await {
            error!(collection, document = %key, error = %e, "failed to store chunks");
            return Err(match e {
                RagError::Timeout { .. } => e,
                e => RagError::PipelineError(format!("failed to index {key}: {e}")),
            });
        }

        let record = IndexedDocumentRecord {
            key: key.clone(),
            collection: collection.to_string(),
            chunk_count: chunks.len(),
            failed_embeddings: embedded.failed_items,
            indexed_at,
        };
        if let Err(e) = self.bounded("record document", self.index.record_document(&record)).await {
            warn!(
                collection,
                document = %key,
                error = %e,
                "chunks stored but indexing record not written"
            );
        }

        info!(collection, document = %key, chunks = chunks.len(), "indexed document");
        Ok(IndexOutcome::Indexed {
            chunks: chunks.len(),
            failed_embeddings: embedded.failed_items,
        })
    }
}
