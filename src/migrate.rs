//! Schema creation for the SQLite vector store.
//!
//! | Table | Purpose |
//! |-------|---------|
//! | `chunks` | One row per stored chunk: metadata, text, and embedding BLOB |
//! | `store_meta` | Key/value collection settings (currently `dims`) |
//!
//! `chunks.seq` is an autoincrementing insertion counter. Upserts keep a
//! row's `seq`, so it doubles as the tie-breaker for equal search scores.

use sqlx::SqlitePool;

use crate::error::{Error, Result};

/// Create tables if missing and reconcile the collection's dimensionality.
///
/// A fresh database records `dims`. An existing one must match it, unless
/// `dims` is 0 (embeddings disabled), in which case the stored value is
/// adopted so the collection stays readable. Returns the effective dims.
pub async fn run_migrations(pool: &SqlitePool, dims: usize) -> Result<usize> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            chunk_id TEXT NOT NULL UNIQUE,
            document_id TEXT NOT NULL,
            filename TEXT NOT NULL,
            source_type TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            start_offset INTEGER NOT NULL,
            end_offset INTEGER NOT NULL,
            text TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            uploaded_at INTEGER NOT NULL,
            chunk_size INTEGER NOT NULL,
            chunk_overlap INTEGER NOT NULL,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS store_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON chunks(document_id)")
        .execute(pool)
        .await?;

    let stored: Option<String> =
        sqlx::query_scalar("SELECT value FROM store_meta WHERE key = 'dims'")
            .fetch_optional(pool)
            .await?;

    match stored {
        None => {
            if dims > 0 {
                sqlx::query("INSERT INTO store_meta (key, value) VALUES ('dims', ?)")
                    .bind(dims.to_string())
                    .execute(pool)
                    .await?;
            }
            Ok(dims)
        }
        Some(value) => {
            let existing: usize = value.parse().map_err(|_| {
                Error::VectorStore(format!("corrupt dims value in store_meta: {:?}", value))
            })?;
            if dims != 0 && dims != existing {
                return Err(Error::VectorStore(format!(
                    "dimensionality mismatch: store holds {}-dimensional vectors, embedding provider produces {}",
                    existing, dims
                )));
            }
            Ok(existing)
        }
    }
}
