//! Core data models used throughout kbase.
//!
//! These types represent the documents, chunks, index entries, and query
//! results that flow through the ingestion and retrieval pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::extract::SourceType;

/// Chunking parameters recorded with each document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingParams {
    /// Window length in characters.
    pub chunk_size: usize,
    /// Characters shared between consecutive windows. Must be `< chunk_size`.
    pub chunk_overlap: usize,
}

impl Default for ChunkingParams {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

/// A document after text extraction, ready to be chunked.
///
/// Documents are never mutated after chunking; a re-upload with the same
/// filename produces a new `Document` with the same `id` that supersedes it.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub filename: String,
    pub source_type: SourceType,
    pub text: String,
    pub uploaded_at: DateTime<Utc>,
    pub params: ChunkingParams,
}

/// A contiguous character window of a document's text.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    /// Sequence index within the document, starting at 0.
    pub chunk_index: i64,
    pub text: String,
    /// Character offset (inclusive) in the document text.
    pub start: usize,
    /// Character offset (exclusive) in the document text.
    pub end: usize,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
    /// `None` until the embedding gateway has produced a vector.
    pub embedding: Option<Vec<f32>>,
}

/// One searchable row in the vector store: a chunk paired with its vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub chunk_id: String,
    pub document_id: String,
    pub filename: String,
    pub source_type: SourceType,
    pub chunk_index: i64,
    pub text: String,
    pub start: usize,
    pub end: usize,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
    /// Upload time as a Unix timestamp (seconds).
    pub uploaded_at: i64,
    /// Parameters the owning document was chunked with.
    pub params: ChunkingParams,
    pub vector: Vec<f32>,
}

impl IndexEntry {
    /// Build an entry from an embedded chunk of `doc`.
    ///
    /// Returns `None` if the chunk has no embedding yet.
    pub fn from_chunk(doc: &Document, chunk: &Chunk) -> Option<Self> {
        let vector = chunk.embedding.clone()?;
        Some(Self {
            chunk_id: chunk.id.clone(),
            document_id: doc.id.clone(),
            filename: doc.filename.clone(),
            source_type: doc.source_type,
            chunk_index: chunk.chunk_index,
            text: chunk.text.clone(),
            start: chunk.start,
            end: chunk.end,
            hash: chunk.hash.clone(),
            uploaded_at: doc.uploaded_at.timestamp(),
            params: doc.params,
            vector,
        })
    }
}

/// A stored entry returned by similarity search, with its raw score.
#[derive(Debug, Clone)]
pub struct ScoredEntry {
    pub entry: IndexEntry,
    pub score: f32,
}

/// A ranked retrieval hit.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub chunk_id: String,
    /// Cosine similarity; higher is more relevant.
    pub score: f32,
    /// 1-based rank in the result list.
    pub rank: usize,
    pub document_id: String,
    pub filename: String,
    pub source_type: SourceType,
    pub chunk_index: i64,
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// Document-level summary derived from stored chunk metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentSummary {
    pub document_id: String,
    pub filename: String,
    pub chunk_count: usize,
    pub source_type: SourceType,
    pub uploaded_at: i64,
    pub params: ChunkingParams,
}

/// A stored chunk as returned by document lookup (no vector).
#[derive(Debug, Clone, Serialize)]
pub struct StoredChunk {
    pub chunk_id: String,
    pub chunk_index: i64,
    pub start: usize,
    pub end: usize,
    pub hash: String,
    pub text: String,
}

/// A document's full stored chunk set, in sequence order.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentChunks {
    pub summary: DocumentSummary,
    pub chunks: Vec<StoredChunk>,
}

/// Aggregate counts over the whole collection.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub total_documents: usize,
    pub total_chunks: usize,
    /// `(source_type, chunk_count)` pairs, sorted by source type.
    pub chunks_by_type: Vec<(String, usize)>,
    pub dims: usize,
}
