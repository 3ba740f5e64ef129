//! SQLite-backed [`VectorStore`] implementation.
//!
//! Every mutation runs inside a single transaction, so a failed
//! [`replace_document`](VectorStore::replace_document) leaves the previous
//! chunk set intact and concurrent searches never see a partial swap.
//! Search is brute force: all vectors are loaded and scored in Rust.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::path::Path;

use crate::db;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::{Error, Result};
use crate::extract::SourceType;
use crate::migrate;
use crate::models::{
    ChunkingParams, DocumentChunks, DocumentSummary, IndexEntry, ScoredEntry, StoreStats,
    StoredChunk,
};

use super::{check_ownership, check_query, prepare_entries, rank, VectorStore};

const SELECT_ENTRY: &str = "SELECT seq, chunk_id, document_id, filename, source_type, chunk_index, \
     start_offset, end_offset, text, content_hash, uploaded_at, chunk_size, chunk_overlap, \
     embedding FROM chunks";

/// Persistent vector store over a [`SqlitePool`].
pub struct SqliteStore {
    pool: SqlitePool,
    dims: usize,
    max_top_k: usize,
}

impl SqliteStore {
    /// Open the database at `path`, creating the schema on first use.
    ///
    /// Fails with [`Error::VectorStore`] if the database already holds
    /// vectors of a different dimensionality.
    pub async fn open(path: &Path, dims: usize, max_top_k: usize) -> Result<Self> {
        let pool = db::connect(path).await?;
        let dims = migrate::run_migrations(&pool, dims).await?;
        Ok(Self {
            pool,
            dims,
            max_top_k,
        })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn insert(tx: &mut Transaction<'_, Sqlite>, entry: &IndexEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO chunks (chunk_id, document_id, filename, source_type, chunk_index,
                                start_offset, end_offset, text, content_hash, uploaded_at,
                                chunk_size, chunk_overlap, embedding)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(chunk_id) DO UPDATE SET
                document_id = excluded.document_id,
                filename = excluded.filename,
                source_type = excluded.source_type,
                chunk_index = excluded.chunk_index,
                start_offset = excluded.start_offset,
                end_offset = excluded.end_offset,
                text = excluded.text,
                content_hash = excluded.content_hash,
                uploaded_at = excluded.uploaded_at,
                chunk_size = excluded.chunk_size,
                chunk_overlap = excluded.chunk_overlap,
                embedding = excluded.embedding
            "#,
        )
        .bind(&entry.chunk_id)
        .bind(&entry.document_id)
        .bind(&entry.filename)
        .bind(entry.source_type.as_str())
        .bind(entry.chunk_index)
        .bind(entry.start as i64)
        .bind(entry.end as i64)
        .bind(&entry.text)
        .bind(&entry.hash)
        .bind(entry.uploaded_at)
        .bind(entry.params.chunk_size as i64)
        .bind(entry.params.chunk_overlap as i64)
        .bind(vec_to_blob(&entry.vector))
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Decode a row into `(seq, entry)`; corrupt rows are store errors.
    fn decode(&self, row: &SqliteRow) -> Result<(i64, IndexEntry)> {
        let chunk_id: String = row.try_get("chunk_id")?;
        let source_type: String = row.try_get("source_type")?;
        let source_type = SourceType::parse(&source_type).ok_or_else(|| {
            Error::VectorStore(format!(
                "corrupt row {}: unknown source type {:?}",
                chunk_id, source_type
            ))
        })?;
        let blob: Vec<u8> = row.try_get("embedding")?;
        let vector = blob_to_vec(&blob)
            .filter(|v| v.len() == self.dims)
            .ok_or_else(|| {
                Error::VectorStore(format!("corrupt row {}: bad embedding blob", chunk_id))
            })?;
        let start: i64 = row.try_get("start_offset")?;
        let end: i64 = row.try_get("end_offset")?;

        Ok((
            row.try_get("seq")?,
            IndexEntry {
                chunk_id,
                document_id: row.try_get("document_id")?,
                filename: row.try_get("filename")?,
                source_type,
                chunk_index: row.try_get("chunk_index")?,
                text: row.try_get("text")?,
                start: start as usize,
                end: end as usize,
                hash: row.try_get("content_hash")?,
                uploaded_at: row.try_get("uploaded_at")?,
                params: params_from_row(row)?,
                vector,
            },
        ))
    }
}

#[async_trait]
impl VectorStore for SqliteStore {
    fn dims(&self) -> usize {
        self.dims
    }

    fn max_top_k(&self) -> usize {
        self.max_top_k
    }

    async fn upsert(&self, entries: &[IndexEntry]) -> Result<()> {
        let prepared = prepare_entries(entries, self.dims)?;
        let mut tx = self.pool.begin().await?;
        for entry in &prepared {
            Self::insert(&mut tx, entry).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn replace_document(&self, document_id: &str, entries: &[IndexEntry]) -> Result<()> {
        check_ownership(document_id, entries)?;
        let prepared = prepare_entries(entries, self.dims)?;

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;
        for entry in &prepared {
            Self::insert(&mut tx, entry).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn search(&self, query_vector: &[f32], top_k: usize) -> Result<Vec<ScoredEntry>> {
        check_query(query_vector, self.dims)?;
        let k = top_k.min(self.max_top_k);
        if k == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(&format!("{} ORDER BY seq", SELECT_ENTRY))
            .fetch_all(&self.pool)
            .await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let (seq, entry) = self.decode(row)?;
            let score = cosine_similarity(query_vector, &entry.vector);
            hits.push((seq, ScoredEntry { entry, score }));
        }
        Ok(rank(hits, k))
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() as usize)
    }

    async fn clear(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunks").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT document_id, filename, source_type, uploaded_at, chunk_size, chunk_overlap,
                   COUNT(*) AS chunk_count, MIN(seq) AS first_seq
            FROM chunks
            GROUP BY document_id
            ORDER BY first_seq
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(summary_from_row).collect()
    }

    async fn document_chunks(&self, document_id: &str) -> Result<Option<DocumentChunks>> {
        let rows = sqlx::query(
            r#"
            SELECT chunk_id, document_id, filename, source_type, uploaded_at,
                   chunk_size, chunk_overlap, chunk_index, start_offset, end_offset,
                   text, content_hash
            FROM chunks
            WHERE document_id = ?
            ORDER BY chunk_index
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        let Some(first) = rows.first() else {
            return Ok(None);
        };

        let mut summary = summary_from_row(first)?;
        summary.chunk_count = rows.len();

        let mut chunks = Vec::with_capacity(rows.len());
        for row in &rows {
            let start: i64 = row.try_get("start_offset")?;
            let end: i64 = row.try_get("end_offset")?;
            chunks.push(StoredChunk {
                chunk_id: row.try_get("chunk_id")?,
                chunk_index: row.try_get("chunk_index")?,
                start: start as usize,
                end: end as usize,
                hash: row.try_get("content_hash")?,
                text: row.try_get("text")?,
            });
        }
        Ok(Some(DocumentChunks { summary, chunks }))
    }

    async fn stats(&self) -> Result<StoreStats> {
        let total_documents: i64 =
            sqlx::query_scalar("SELECT COUNT(DISTINCT document_id) FROM chunks")
                .fetch_one(&self.pool)
                .await?;
        let total_chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        let by_type: Vec<(String, i64)> = sqlx::query_as(
            "SELECT source_type, COUNT(*) FROM chunks GROUP BY source_type ORDER BY source_type",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(StoreStats {
            total_documents: total_documents as usize,
            total_chunks: total_chunks as usize,
            chunks_by_type: by_type
                .into_iter()
                .map(|(t, n)| (t, n as usize))
                .collect(),
            dims: self.dims,
        })
    }
}

fn summary_from_row(row: &SqliteRow) -> Result<DocumentSummary> {
    let document_id: String = row.try_get("document_id")?;
    let source_type: String = row.try_get("source_type")?;
    let source_type = SourceType::parse(&source_type).ok_or_else(|| {
        Error::VectorStore(format!(
            "corrupt rows for document {}: unknown source type {:?}",
            document_id, source_type
        ))
    })?;
    let chunk_count: i64 = row.try_get("chunk_count").unwrap_or(0);

    Ok(DocumentSummary {
        document_id,
        filename: row.try_get("filename")?,
        chunk_count: chunk_count as usize,
        source_type,
        uploaded_at: row.try_get("uploaded_at")?,
        params: params_from_row(row)?,
    })
}

fn params_from_row(row: &SqliteRow) -> Result<ChunkingParams> {
    let chunk_size: i64 = row.try_get("chunk_size")?;
    let chunk_overlap: i64 = row.try_get("chunk_overlap")?;
    Ok(ChunkingParams {
        chunk_size: chunk_size as usize,
        chunk_overlap: chunk_overlap as usize,
    })
}
