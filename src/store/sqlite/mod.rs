
use async_trait::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use itertools::Itertools;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

use super::models::{
    ChunkRecord, DocType, Document, DocumentStatus, IndexManifest, NewChunk, NewDocument,
    ScoredChunk,
};
use super::{IndexStore, check_manifest, rank_ordering, validate_chunk_batch};
use crate::embeddings::cosine_similarity;
use crate::{RagError, Result};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    filename TEXT NOT NULL,
    original_filename TEXT NOT NULL,
    doc_type TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    total_pages INTEGER,
    total_chunks INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,
    embedding_model TEXT,
    created_at TIMESTAMP NOT NULL,
    updated_at TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS chunks (
    id TEXT PRIMARY KEY,
    document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    content TEXT NOT NULL,
    section_title TEXT,
    chunk_index INTEGER NOT NULL,
    token_count INTEGER NOT NULL,
    page_number INTEGER,
    embedding BLOB NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    UNIQUE (document_id, chunk_index)
);

CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id);

CREATE TABLE IF NOT EXISTS index_manifest (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    model_id TEXT NOT NULL,
    dimension INTEGER NOT NULL
);

CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
    content,
    chunk_id UNINDEXED,
    tokenize = 'porter unicode61'
);
"#;

const CHUNK_COLUMNS: &str = "c.id, c.document_id, c.content, c.section_title, c.chunk_index, \
     c.token_count, c.page_number, c.embedding, c.metadata, d.filename, d.created_at";

/// SQLite-backed [`IndexStore`]. Vectors are stored as little-endian f32
/// blobs and scored in-process; the lexical index is an FTS5 table with the
/// porter stemmer.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a store at the given file path.
    #[inline]
    pub async fn connect<P: AsRef<Path>>(path: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(storage)?;

        let store = Self { pool };
        store.migrate().await?;
        info!("SQLite index store ready at {}", path.as_ref().display());
        Ok(store)
    }

    /// Open an in-memory store, useful for tests and embedded use.
    #[inline]
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(storage)?
            .foreign_keys(true);

        // A single persistent connection keeps the one in-memory database
        // alive for the lifetime of the pool.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .connect_with(options)
            .await
            .map_err(storage)?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(())
    }
}

#[async_trait]
impl IndexStore for SqliteStore {
    async fn create_document(&self, new_doc: NewDocument) -> Result<Document> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();

        sqlx::query(
            "INSERT INTO documents (id, filename, original_filename, doc_type, status, total_pages, created_at, updated_at) \
             VALUES (?, ?, ?, ?, 'pending', ?, ?, ?)",
        )
        .bind(&id)
        .bind(&new_doc.filename)
        .bind(&new_doc.original_filename)
        .bind(new_doc.doc_type)
        .bind(new_doc.total_pages)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        self.get_document(&id)
            .await?
            .ok_or_else(|| RagError::Storage("failed to retrieve created document".to_string()))
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        sqlx::query_as::<_, Document>("SELECT * FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)
    }

    async fn list_documents(&self) -> Result<Vec<Document>> {
        sqlx::query_as::<_, Document>("SELECT * FROM documents ORDER BY created_at ASC, id ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(storage)
    }

    async fn mark_document_status(
        &self,
        id: &str,
        status: DocumentStatus,
        error: Option<&str>,
    ) -> Result<()> {
        if status == DocumentStatus::Indexed {
            let chunk_count: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE document_id = ?")
                    .bind(id)
                    .fetch_one(&self.pool)
                    .await
                    .map_err(storage)?;
            if chunk_count == 0 {
                return Err(RagError::Consistency(format!(
                    "document {id} has no chunks and cannot be marked indexed"
                )));
            }
        }

        let result = sqlx::query(
            "UPDATE documents SET status = ?, error_message = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status)
        .bind(error)
        .bind(Utc::now().naive_utc())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        if result.rows_affected() == 0 {
            return Err(RagError::Storage(format!("document not found: {id}")));
        }

        debug!("Document {} marked {}", id, status);
        Ok(())
    }

    async fn insert_chunks(
        &self,
        document_id: &str,
        batch: Vec<NewChunk>,
        model_id: &str,
    ) -> Result<usize> {
        let dimension = validate_chunk_batch(document_id, &batch)?;

        let mut tx = self.pool.begin().await.map_err(storage)?;

        let manifest: Option<(String, i64)> =
            sqlx::query_as("SELECT model_id, dimension FROM index_manifest WHERE id = 1")
                .fetch_optional(&mut *tx)
                .await
                .map_err(storage)?;

        match manifest {
            Some((existing_model, existing_dimension)) => {
                check_manifest(
                    &IndexManifest {
                        model_id: existing_model,
                        dimension: existing_dimension.try_into().unwrap_or_default(),
                    },
                    model_id,
                    dimension,
                )?;
            }
            None => {
                sqlx::query("INSERT INTO index_manifest (id, model_id, dimension) VALUES (1, ?, ?)")
                    .bind(model_id)
                    .bind(dimension as i64)
                    .execute(&mut *tx)
                    .await
                    .map_err(storage)?;
            }
        }

        for chunk in &batch {
            let metadata = chunk.metadata.to_string();
            sqlx::query(
                "INSERT INTO chunks (id, document_id, content, section_title, chunk_index, token_count, page_number, embedding, metadata) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(&chunk.content)
            .bind(&chunk.section_title)
            .bind(chunk.chunk_index)
            .bind(chunk.token_count)
            .bind(chunk.page_number)
            .bind(encode_vector(&chunk.embedding))
            .bind(metadata)
            .execute(&mut *tx)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_unique_violation() => RagError::Consistency(
                    format!(
                        "duplicate chunk index {} for document {}",
                        chunk.chunk_index, chunk.document_id
                    ),
                ),
                _ => storage(e),
            })?;

            sqlx::query("INSERT INTO chunks_fts (content, chunk_id) VALUES (?, ?)")
                .bind(&chunk.content)
                .bind(&chunk.id)
                .execute(&mut *tx)
                .await
                .map_err(storage)?;
        }

        let result = sqlx::query(
            "UPDATE documents SET total_chunks = ?, embedding_model = ?, updated_at = ? WHERE id = ?",
        )
        .bind(batch.len() as i64)
        .bind(model_id)
        .bind(Utc::now().naive_utc())
        .bind(document_id)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        if result.rows_affected() == 0 {
            return Err(RagError::Storage(format!(
                "document not found: {document_id}"
            )));
        }

        tx.commit().await.map_err(storage)?;

        debug!(
            "Inserted {} chunks for document {} (model {})",
            batch.len(),
            document_id,
            model_id
        );
        Ok(batch.len())
    }

    async fn delete_document(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        sqlx::query(
            "DELETE FROM chunks_fts WHERE chunk_id IN (SELECT id FROM chunks WHERE document_id = ?)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;

        tx.commit().await.map_err(storage)?;

        Ok(result.rows_affected() > 0)
    }

    async fn embedding_model(&self) -> Result<Option<IndexManifest>> {
        let manifest: Option<(String, i64)> =
            sqlx::query_as("SELECT model_id, dimension FROM index_manifest WHERE id = 1")
                .fetch_optional(&self.pool)
                .await
                .map_err(storage)?;

        Ok(manifest.map(|(model_id, dimension)| IndexManifest {
            model_id,
            dimension: dimension.try_into().unwrap_or_default(),
        }))
    }

    async fn query_vector(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<DocType>,
        threshold: f32,
    ) -> Result<Vec<ScoredChunk>> {
        if let Some(manifest) = self.embedding_model().await? {
            if manifest.dimension != vector.len() {
                return Err(RagError::Consistency(format!(
                    "query vector has {} values but the index dimension is {}",
                    vector.len(),
                    manifest.dimension
                )));
            }
        }

        let mut sql = format!(
            "SELECT {CHUNK_COLUMNS} FROM chunks c \
             JOIN documents d ON d.id = c.document_id \
             WHERE d.status = 'indexed'"
        );
        if filter.is_some() {
            sql.push_str(" AND d.doc_type = ?");
        }

        let mut query = sqlx::query(&sql);
        if let Some(doc_type) = filter {
            query = query.bind(doc_type);
        }

        let mut rows = query.fetch(&self.pool);
        let mut hits = Vec::new();

        while let Some(row) = rows.try_next().await.map_err(storage)? {
            let embedding = decode_vector(&row.try_get::<Vec<u8>, _>("embedding").map_err(storage)?)?;
            let score = cosine_similarity(vector, &embedding);
            if score >= threshold {
                hits.push(scored_chunk_from_row(&row, score)?);
            }
        }

        hits.sort_by(rank_ordering);
        hits.truncate(top_k);

        debug!("Vector query returned {} hits", hits.len());
        Ok(hits)
    }

    async fn query_lexical(
        &self,
        text: &str,
        filter: Option<DocType>,
    ) -> Result<Vec<ScoredChunk>> {
        let Some(match_expr) = fts_match_expression(text) else {
            return Ok(Vec::new());
        };

        let mut sql = format!(
            "SELECT {CHUNK_COLUMNS}, bm25(chunks_fts) AS lexical_rank \
             FROM chunks_fts \
             JOIN chunks c ON c.id = chunks_fts.chunk_id \
             JOIN documents d ON d.id = c.document_id \
             WHERE chunks_fts MATCH ? AND d.status = 'indexed'"
        );
        if filter.is_some() {
            sql.push_str(" AND d.doc_type = ?");
        }

        let mut query = sqlx::query(&sql).bind(&match_expr);
        if let Some(doc_type) = filter {
            query = query.bind(doc_type);
        }

        let rows = query.fetch_all(&self.pool).await.map_err(storage)?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            // bm25() reports better matches as more negative values.
            let rank: f64 = row.try_get("lexical_rank").map_err(storage)?;
            hits.push(scored_chunk_from_row(row, -rank as f32)?);
        }

        hits.sort_by(rank_ordering);

        debug!("Lexical query returned {} hits", hits.len());
        Ok(hits)
    }
}

fn scored_chunk_from_row(row: &SqliteRow, score: f32) -> Result<ScoredChunk> {
    let metadata_raw: String = row.try_get("metadata").map_err(storage)?;
    let metadata = serde_json::from_str(&metadata_raw)
        .map_err(|e| RagError::Storage(format!("invalid chunk metadata: {e}")))?;

    Ok(ScoredChunk {
        chunk: ChunkRecord {
            id: row.try_get("id").map_err(storage)?,
            document_id: row.try_get("document_id").map_err(storage)?,
            content: row.try_get("content").map_err(storage)?,
            section_title: row.try_get("section_title").map_err(storage)?,
            chunk_index: row.try_get("chunk_index").map_err(storage)?,
            token_count: row.try_get("token_count").map_err(storage)?,
            page_number: row.try_get("page_number").map_err(storage)?,
            metadata,
        },
        score,
        document_filename: row.try_get("filename").map_err(storage)?,
        document_created_at: row.try_get("created_at").map_err(storage)?,
    })
}

/// Build an FTS5 MATCH expression from free query text: distinct
/// alphanumeric terms, quoted, joined with OR. Returns `None` when the text
/// carries no usable terms.
fn fts_match_expression(text: &str) -> Option<String> {
    let expr = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|term| !term.is_empty())
        .map(str::to_lowercase)
        .unique()
        .map(|term| format!("\"{term}\""))
        .join(" OR ");

    if expr.is_empty() { None } else { Some(expr) }
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn decode_vector(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(RagError::Storage(format!(
            "stored embedding has invalid length: {} bytes",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|raw| f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
        .collect())
}

fn storage<E: std::fmt::Display>(error: E) -> RagError {
    RagError::Storage(error.to_string())
}
