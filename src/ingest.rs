//! Ingestion pipeline: upload → extract → chunk → embed → store.
//!
//! ```text
//! Upload { filename, bytes }
//!   │ SourceType::from_filename      (UnsupportedFileType)
//!   │ chunk::validate_params          (Chunking)
//!   │ extract::extract_text
//!   │ chunk::chunk_document
//!   │ embedding::embed_with_timeout   (EmbeddingService, store untouched)
//!   ▼ store.replace_document          (VectorStore, all-or-nothing)
//! ```
//!
//! A document's identity is derived from its filename, so uploading the same
//! filename again replaces the earlier version's chunks in one step. Every
//! failure is wrapped in [`Error::Ingest`](crate::error::Error::Ingest) naming the file.

use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::chunk::{chunk_document, validate_params};
use crate::embedding::{embed_with_timeout, EmbeddingGateway};
use crate::error::Result;
use crate::extract::{extract_text, SourceType};
use crate::models::{ChunkingParams, Document, IndexEntry};
use crate::store::VectorStore;

/// Raw upload as received from the CLI or HTTP layer.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub bytes: Vec<u8>,
    /// Overrides the configured chunking parameters for this document.
    pub params: Option<ChunkingParams>,
}

impl Upload {
    pub fn new(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            bytes: bytes.into(),
            params: None,
        }
    }

    pub fn with_params(mut self, params: ChunkingParams) -> Self {
        self.params = Some(params);
        self
    }
}

/// Outcome of a successful ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub document_id: String,
    pub filename: String,
    pub source_type: SourceType,
    pub chunk_count: usize,
}

/// Stable document id for a filename (UUID v5).
pub fn document_id_for(filename: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, filename.as_bytes()).to_string()
}

// ============ Per-document serialization ============

/// Async mutexes keyed by document id.
///
/// Writers for the same document queue in arrival order; writers for
/// different documents proceed in parallel.
#[derive(Default)]
pub struct DocumentLocks {
    slots: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DocumentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `document_id`.
    pub async fn lock(&self, document_id: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock().await;
            // Only the map itself holds an idle slot.
            slots.retain(|_, m| Arc::strong_count(m) > 1);
            slots
                .entry(document_id.to_string())
                .or_default()
                .clone()
        };
        slot.lock_owned().await
    }
}

// ============ Pipeline ============

/// Runs uploads through extraction, chunking, embedding and storage.
///
/// Callers are responsible for serializing writes to the same document
/// (see [`DocumentLocks`]).
pub struct Ingestor {
    store: Arc<dyn VectorStore>,
    gateway: Arc<dyn EmbeddingGateway>,
    default_params: ChunkingParams,
    timeout: Duration,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn VectorStore>,
        gateway: Arc<dyn EmbeddingGateway>,
        default_params: ChunkingParams,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            gateway,
            default_params,
            timeout,
        }
    }

    /// Ingest one upload, replacing any earlier document with the same filename.
    pub async fn ingest(&self, upload: Upload) -> Result<IngestReport> {
        let filename = upload.filename.clone();
        self.run(upload).await.map_err(|e| {
            tracing::warn!(filename = %filename, error = %e, "ingestion failed");
            e.for_document(&filename)
        })
    }

    async fn run(&self, upload: Upload) -> Result<IngestReport> {
        let source_type = SourceType::from_filename(&upload.filename)?;
        let params = upload.params.unwrap_or(self.default_params);
        validate_params(&params)?;

        let text = extract_text(&upload.filename, &upload.bytes, source_type)?;

        let document = Document {
            id: document_id_for(&upload.filename),
            filename: upload.filename,
            source_type,
            text,
            uploaded_at: Utc::now(),
            params,
        };

        let mut chunks = chunk_document(&document.id, &document.text, params)?;
        tracing::debug!(
            document_id = %document.id,
            chars = document.text.chars().count(),
            chunks = chunks.len(),
            "chunked document"
        );

        // An empty document still supersedes its earlier chunks.
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = if texts.is_empty() {
            Vec::new()
        } else {
            embed_with_timeout(self.gateway.as_ref(), &texts, self.store.dims(), self.timeout)
                .await?
        };
        for (chunk, vector) in chunks.iter_mut().zip(vectors) {
            chunk.embedding = Some(vector);
        }

        let entries: Vec<IndexEntry> = chunks
            .iter()
            .filter_map(|c| IndexEntry::from_chunk(&document, c))
            .collect();

        self.store.replace_document(&document.id, &entries).await?;

        tracing::info!(
            document_id = %document.id,
            filename = %document.filename,
            source_type = %document.source_type,
            chunks = entries.len(),
            "ingested document"
        );

        Ok(IngestReport {
            document_id: document.id,
            filename: document.filename,
            source_type: document.source_type,
            chunk_count: entries.len(),
        })
    }
}
