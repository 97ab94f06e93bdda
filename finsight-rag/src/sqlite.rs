//! SQLite-backed persistent vector index.
//!
//! This module is only available when the `sqlite` feature is enabled.
//!
//! All collections live in one database file. Metadata fields that can be
//! filtered on are stored in their own columns so filters run in SQL; the full
//! metadata is kept as JSON and embeddings as little-endian `f32` BLOBs.
//! Cosine distance is computed in Rust over the filtered rows.

use std::fmt::Display;
use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{QueryBuilder, Row, Sqlite};
use tracing::{debug, info};

use crate::document::{
    Chunk, ChunkKind, ChunkMetadata, DocumentKey, IndexedDocumentRecord, MetadataFilter,
    QueryResult,
};
use crate::error::{RagError, Result};
use crate::vectorstore::{VectorIndex, cosine_distance, nearest, validate_upsert};

const BACKEND: &str = "SQLite";

/// File name of the database inside the storage directory.
pub const DATABASE_FILE: &str = "index.sqlite";

fn store_err(context: &str, e: impl Display) -> RagError {
    RagError::VectorStoreError { backend: BACKEND.to_string(), message: format!("{context}: {e}") }
}

/// Encode a float vector as a little-endian BLOB.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB produced by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4).map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])).collect()
}

/// A [`VectorIndex`] persisted in a SQLite database.
///
/// # Example
///
/// ```rust,ignore
/// use finsight_rag::sqlite::SqliteVectorIndex;
///
/// let index = SqliteVectorIndex::open("./rag_index").await?;
/// ```
#[derive(Debug, Clone)]
pub struct SqliteVectorIndex {
    pool: SqlitePool,
}

impl SqliteVectorIndex {
    /// Open (or create) the index database inside `dir`.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .map_err(|e| store_err(&format!("failed to create {}", dir.display()), e))?;
        let db_path = dir.join(DATABASE_FILE);

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| store_err("failed to open database", e))?;

        info!(path = %db_path.display(), "opened vector index");
        Self::from_pool(pool).await
    }

    /// Use an existing pool, creating the schema if needed.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        let index = Self { pool };
        index.migrate().await?;
        Ok(index)
    }

    async fn migrate(&self) -> Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS collections (
                name TEXT PRIMARY KEY,
                dimensions INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                kind TEXT NOT NULL,
                parent_id TEXT,
                text TEXT NOT NULL,
                ticker TEXT,
                doc_type TEXT,
                year INTEGER,
                section TEXT,
                source TEXT,
                article_id TEXT,
                metadata_json TEXT NOT NULL DEFAULT '{}',
                embedding BLOB NOT NULL,
                PRIMARY KEY (collection, id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS indexed_documents (
                collection TEXT NOT NULL,
                document_key TEXT NOT NULL,
                record_json TEXT NOT NULL,
                indexed_at TEXT NOT NULL,
                PRIMARY KEY (collection, document_key)
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_chunks_filing
                ON chunks(collection, ticker, doc_type, year)",
            "CREATE INDEX IF NOT EXISTS idx_chunks_parent ON chunks(collection, parent_id)",
            "CREATE INDEX IF NOT EXISTS idx_chunks_article
                ON chunks(collection, source, article_id)",
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| store_err("migration failed", e))?;
        }
        Ok(())
    }

    /// Close the underlying pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn dimensions(&self, collection: &str) -> Result<Option<usize>> {
        let dims: Option<i64> =
            sqlx::query_scalar("SELECT dimensions FROM collections WHERE name = ?")
                .bind(collection)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| store_err("failed to read collection", e))?;
        Ok(dims.map(|d| d as usize))
    }
}

/// Append `AND column = ?` for every constrained filter field.
fn push_filter(builder: &mut QueryBuilder<'_, Sqlite>, filter: &MetadataFilter) {
    let text_columns = [
        ("ticker", &filter.ticker),
        ("doc_type", &filter.doc_type),
        ("section", &filter.section),
        ("parent_id", &filter.parent_id),
        ("source", &filter.source),
        ("article_id", &filter.article_id),
    ];
    for (column, value) in text_columns {
        if let Some(value) = value {
            builder.push(format!(" AND {column} = ")).push_bind(value.clone());
        }
    }
    if let Some(year) = filter.year {
        builder.push(" AND year = ").push_bind(year);
    }
    if let Some(kind) = filter.kind {
        builder.push(" AND kind = ").push_bind(kind.as_str());
    }
}

fn row_to_chunk(row: &SqliteRow) -> Result<(Chunk, Vec<f32>)> {
    let get_err = |e: sqlx::Error| store_err("failed to decode row", e);
    let kind: String = row.try_get("kind").map_err(get_err)?;
    let metadata_json: String = row.try_get("metadata_json").map_err(get_err)?;
    let blob: Vec<u8> = row.try_get("embedding").map_err(get_err)?;

    let chunk = Chunk {
        id: row.try_get("id").map_err(get_err)?,
        text: row.try_get("text").map_err(get_err)?,
        kind: ChunkKind::parse(&kind).ok_or_else(|| store_err("unknown chunk kind", &kind))?,
        parent_id: row.try_get("parent_id").map_err(get_err)?,
        metadata: serde_json::from_str::<ChunkMetadata>(&metadata_json)
            .map_err(|e| store_err("invalid metadata json", e))?,
    };
    Ok((chunk, blob_to_vec(&blob)))
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn create_collection(&self, name: &str, dimensions: usize) -> Result<()> {
        sqlx::query(
            "INSERT INTO collections (name, dimensions) VALUES (?, ?) ON CONFLICT(name) DO NOTHING",
        )
        .bind(name)
        .bind(dimensions as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| store_err("failed to create collection", e))?;
        Ok(())
    }

    async fn upsert(&self, collection: &str, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<()> {
        let dimensions = self.dimensions(collection).await?;
        validate_upsert(BACKEND, chunks, vectors, dimensions)?;
        if chunks.is_empty() {
            return Ok(());
        }
        if dimensions.is_none() {
            self.create_collection(collection, vectors[0].len()).await?;
        }

        let mut tx =
            self.pool.begin().await.map_err(|e| store_err("failed to begin transaction", e))?;
        for (chunk, vector) in chunks.iter().zip(vectors) {
            let meta = &chunk.metadata;
            let metadata_json =
                serde_json::to_string(meta).map_err(|e| store_err("failed to encode metadata", e))?;
            sqlx::query(
                r#"
                INSERT INTO chunks (collection, id, kind, parent_id, text, ticker, doc_type, year,
                                    section, source, article_id, metadata_json, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(collection, id) DO UPDATE SET
                    kind = excluded.kind,
                    parent_id = excluded.parent_id,
                    text = excluded.text,
                    ticker = excluded.ticker,
                    doc_type = excluded.doc_type,
                    year = excluded.year,
                    section = excluded.section,
                    source = excluded.source,
                    article_id = excluded.article_id,
                    metadata_json = excluded.metadata_json,
                    embedding = excluded.embedding
                "#,
            )
            .bind(collection)
            .bind(&chunk.id)
            .bind(chunk.kind.as_str())
            .bind(&chunk.parent_id)
            .bind(&chunk.text)
            .bind(&meta.ticker)
            .bind(&meta.doc_type)
            .bind(meta.year)
            .bind(&meta.section)
            .bind(&meta.source)
            .bind(&meta.article_id)
            .bind(&metadata_json)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await
            .map_err(|e| store_err(&format!("failed to upsert chunk '{}'", chunk.id), e))?;
        }
        tx.commit().await.map_err(|e| store_err("failed to commit upsert", e))?;

        debug!(collection, chunks = chunks.len(), "upserted chunks");
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        filter: &MetadataFilter,
        k: usize,
    ) -> Result<Vec<QueryResult>> {
        if let Some(dims) = self.dimensions(collection).await? {
            if dims != vector.len() {
                return Err(store_err(
                    &format!("collection '{collection}' expects {dims} dimensions"),
                    format!("query vector has {}", vector.len()),
                ));
            }
        }

        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT id, kind, parent_id, text, metadata_json, embedding \
             FROM chunks WHERE collection = ",
        );
        builder.push_bind(collection.to_string());
        push_filter(&mut builder, filter);

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_err("query failed", e))?;
        let mut scored = Vec::with_capacity(rows.len());
        for row in &rows {
            let (chunk, stored) = row_to_chunk(row)?;
            scored.push(QueryResult::from_chunk(&chunk, cosine_distance(&stored, vector)));
        }
        Ok(nearest(scored, k))
    }

    async fn exists(&self, collection: &str, filter: &MetadataFilter) -> Result<bool> {
        let mut builder =
            QueryBuilder::<Sqlite>::new("SELECT EXISTS(SELECT 1 FROM chunks WHERE collection = ");
        builder.push_bind(collection.to_string());
        push_filter(&mut builder, filter);
        builder.push(")");

        let exists: bool = builder
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| store_err("existence check failed", e))?;
        Ok(exists)
    }

    async fn delete(&self, collection: &str, filter: &MetadataFilter) -> Result<usize> {
        let mut builder = QueryBuilder::<Sqlite>::new("DELETE FROM chunks WHERE collection = ");
        builder.push_bind(collection.to_string());
        push_filter(&mut builder, filter);

        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(|e| store_err("delete failed", e))?;
        Ok(result.rows_affected() as usize)
    }

    async fn count(&self, collection: &str, filter: &MetadataFilter) -> Result<usize> {
        let mut builder =
            QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM chunks WHERE collection = ");
        builder.push_bind(collection.to_string());
        push_filter(&mut builder, filter);

        let count: i64 = builder
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| store_err("count failed", e))?;
        Ok(count as usize)
    }

    async fn record_document(&self, record: &IndexedDocumentRecord) -> Result<()> {
        let key = serde_json::to_string(&record.key)
            .map_err(|e| store_err("failed to encode key", e))?;
        let json =
            serde_json::to_string(record).map_err(|e| store_err("failed to encode record", e))?;
        sqlx::query(
            r#"
            INSERT INTO indexed_documents (collection, document_key, record_json, indexed_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(collection, document_key) DO NOTHING
            "#,
        )
        .bind(&record.collection)
        .bind(&key)
        .bind(&json)
        .bind(&record.indexed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| store_err("failed to record document", e))?;
        Ok(())
    }

    async fn remove_document_record(&self, collection: &str, key: &DocumentKey) -> Result<bool> {
        let key = serde_json::to_string(key).map_err(|e| store_err("failed to encode key", e))?;
        let result =
            sqlx::query("DELETE FROM indexed_documents WHERE collection = ? AND document_key = ?")
                .bind(collection)
                .bind(&key)
                .execute(&self.pool)
                .await
                .map_err(|e| store_err("failed to remove document record", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn document_records(&self, collection: &str) -> Result<Vec<IndexedDocumentRecord>> {
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT record_json FROM indexed_documents WHERE collection = ? ORDER BY indexed_at",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_err("failed to list document records", e))?;

        rows.iter()
            .map(|json| {
                serde_json::from_str(json).map_err(|e| store_err("invalid document record", e))
            })
            .collect()
    }

    fn backend(&self) -> &str {
        BACKEND
    }
}
