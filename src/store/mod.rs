//! Vector store abstraction.
//!
//! The [`VectorStore`] trait is the single choke point for every mutation of
//! the index: [`upsert`](VectorStore::upsert),
//! [`replace_document`](VectorStore::replace_document),
//! [`delete_by_document`](VectorStore::delete_by_document) and
//! [`clear`](VectorStore::clear). Each call is atomic from the point of view
//! of concurrent readers: they see the state before or after, never a mix.
//!
//! Two backends:
//! - [`memory::InMemoryStore`]: `RwLock`-guarded `Vec`, for tests and ephemeral use.
//! - [`sqlite::SqliteStore`]: persistent, one transaction per mutation.
//!
//! # Ranking
//!
//! Stored vectors are normalized on write. Search scores are cosine
//! similarity; results are ordered by score descending, then by insertion
//! order (earlier first). `top_k` is clamped to the store's `max_top_k`.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::embedding::normalize;
use crate::error::{Error, Result};
use crate::models::{DocumentChunks, DocumentSummary, IndexEntry, ScoredEntry, StoreStats};

/// Abstract storage backend for chunk vectors.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](VectorStore::upsert) | Insert or replace entries by chunk id |
/// | [`replace_document`](VectorStore::replace_document) | Swap a document's whole chunk set |
/// | [`search`](VectorStore::search) | Cosine similarity top-k |
/// | [`delete_by_document`](VectorStore::delete_by_document) | Remove a document's entries |
/// | [`clear`](VectorStore::clear) | Remove everything |
/// | [`list_documents`](VectorStore::list_documents) | Per-document summaries |
/// | [`document_chunks`](VectorStore::document_chunks) | One document's stored chunks |
/// | [`stats`](VectorStore::stats) | Collection counts |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Dimensionality every stored vector must have.
    fn dims(&self) -> usize;

    /// Largest `top_k` a search will honor.
    fn max_top_k(&self) -> usize;

    /// Insert or replace entries keyed by chunk id. All-or-nothing.
    async fn upsert(&self, entries: &[IndexEntry]) -> Result<()>;

    /// Atomically replace every entry of `document_id` with `entries`.
    async fn replace_document(&self, document_id: &str, entries: &[IndexEntry]) -> Result<()>;

    /// Up to `top_k` (clamped) most similar entries, best first.
    async fn search(&self, query_vector: &[f32], top_k: usize) -> Result<Vec<ScoredEntry>>;

    /// Remove all entries of a document. Returns how many were removed.
    async fn delete_by_document(&self, document_id: &str) -> Result<usize>;

    /// Remove all entries.
    async fn clear(&self) -> Result<()>;

    /// Document summaries derived from stored chunks, in insertion order.
    async fn list_documents(&self) -> Result<Vec<DocumentSummary>>;

    /// A document's stored chunks in sequence order, or `None` if unknown.
    async fn document_chunks(&self, document_id: &str) -> Result<Option<DocumentChunks>>;

    /// Aggregate counts.
    async fn stats(&self) -> Result<StoreStats>;
}

/// Check dimensionality and return normalized copies of `entries`.
///
/// Runs before any mutation so a bad batch leaves the store untouched.
pub(crate) fn prepare_entries(entries: &[IndexEntry], dims: usize) -> Result<Vec<IndexEntry>> {
    entries
        .iter()
        .map(|e| {
            if e.vector.len() != dims {
                return Err(Error::VectorStore(format!(
                    "dimensionality mismatch for chunk {}: expected {}, got {}",
                    e.chunk_id,
                    dims,
                    e.vector.len()
                )));
            }
            if e.vector.iter().any(|x| !x.is_finite()) {
                return Err(Error::VectorStore(format!(
                    "non-finite value in vector for chunk {}",
                    e.chunk_id
                )));
            }
            let mut entry = e.clone();
            normalize(&mut entry.vector);
            Ok(entry)
        })
        .collect()
}

/// Check that every entry in a replacement batch belongs to `document_id`.
pub(crate) fn check_ownership(document_id: &str, entries: &[IndexEntry]) -> Result<()> {
    match entries.iter().find(|e| e.document_id != document_id) {
        Some(stray) => Err(Error::VectorStore(format!(
            "chunk {} belongs to document {}, not {}",
            stray.chunk_id, stray.document_id, document_id
        ))),
        None => Ok(()),
    }
}

/// Validate a query vector against the store's dimensionality.
pub(crate) fn check_query(query_vector: &[f32], dims: usize) -> Result<()> {
    if query_vector.len() != dims {
        return Err(Error::VectorStore(format!(
            "dimensionality mismatch for query: expected {}, got {}",
            dims,
            query_vector.len()
        )));
    }
    Ok(())
}

/// Order `(insertion_seq, hit)` pairs by score desc then seq asc, keep `k`.
pub(crate) fn rank(mut hits: Vec<(i64, ScoredEntry)>, k: usize) -> Vec<ScoredEntry> {
    hits.sort_by(|(seq_a, a), (seq_b, b)| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then(seq_a.cmp(seq_b))
    });
    hits.truncate(k);
    hits.into_iter().map(|(_, hit)| hit).collect()
}

/// Build per-document summaries from entries given in insertion order.
pub(crate) fn summarize<'a, I>(entries: I) -> Vec<DocumentSummary>
where
    I: IntoIterator<Item = &'a IndexEntry>,
{
    let mut order: Vec<String> = Vec::new();
    let mut by_doc: BTreeMap<String, DocumentSummary> = BTreeMap::new();

    for e in entries {
        by_doc
            .entry(e.document_id.clone())
            .and_modify(|s| s.chunk_count += 1)
            .or_insert_with(|| {
                order.push(e.document_id.clone());
                DocumentSummary {
                    document_id: e.document_id.clone(),
                    filename: e.filename.clone(),
                    chunk_count: 1,
                    source_type: e.source_type,
                    uploaded_at: e.uploaded_at,
                    params: e.params,
                }
            });
    }

    order
        .into_iter()
        .filter_map(|id| by_doc.remove(&id))
        .collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::chunk::content_hash;
    use crate::extract::SourceType;
    use crate::models::{ChunkingParams, IndexEntry};

    /// An entry with a hand-picked vector, for store tests.
    pub fn entry(doc: &str, index: i64, vector: Vec<f32>) -> IndexEntry {
        let text = format!("{} chunk {}", doc, index);
        IndexEntry {
            chunk_id: format!("{}-c{}", doc, index),
            document_id: doc.to_string(),
            filename: format!("{}.txt", doc),
            source_type: SourceType::Text,
            chunk_index: index,
            hash: content_hash(&text),
            text,
            start: index as usize * 10,
            end: index as usize * 10 + 12,
            uploaded_at: 1_700_000_000,
            params: ChunkingParams {
                chunk_size: 12,
                chunk_overlap: 2,
            },
            vector,
        }
    }
}
