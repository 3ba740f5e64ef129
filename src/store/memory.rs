//! In-memory [`VectorStore`] implementation for tests and ephemeral use.
//!
//! All entries live in one `Vec` behind a single `std::sync::RwLock`, so each
//! mutation is applied under one write guard and readers never observe a
//! half-replaced document. Search is brute-force cosine similarity.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::embedding::cosine_similarity;
use crate::error::{Error, Result};
use crate::models::{
    DocumentChunks, DocumentSummary, IndexEntry, ScoredEntry, StoreStats, StoredChunk,
};

use super::{check_ownership, check_query, prepare_entries, rank, summarize, VectorStore};

struct Stored {
    seq: i64,
    entry: IndexEntry,
}

#[derive(Default)]
struct State {
    entries: Vec<Stored>,
    next_seq: i64,
}

impl State {
    fn push(&mut self, entry: IndexEntry) {
        self.next_seq += 1;
        self.entries.push(Stored {
            seq: self.next_seq,
            entry,
        });
    }
}

/// Volatile vector store. Contents are lost when dropped.
pub struct InMemoryStore {
    dims: usize,
    max_top_k: usize,
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new(dims: usize, max_top_k: usize) -> Self {
        Self {
            dims,
            max_top_k,
            state: RwLock::new(State::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| Error::VectorStore("store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| Error::VectorStore("store lock poisoned".to_string()))
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    fn dims(&self) -> usize {
        self.dims
    }

    fn max_top_k(&self) -> usize {
        self.max_top_k
    }

    async fn upsert(&self, entries: &[IndexEntry]) -> Result<()> {
        let prepared = prepare_entries(entries, self.dims)?;
        let mut state = self.write()?;
        for entry in prepared {
            let existing = state
                .entries
                .iter()
                .position(|s| s.entry.chunk_id == entry.chunk_id);
            match existing {
                // Replaced in place: keeps its original insertion order.
                Some(i) => state.entries[i].entry = entry,
                None => state.push(entry),
            }
        }
        Ok(())
    }

    async fn replace_document(&self, document_id: &str, entries: &[IndexEntry]) -> Result<()> {
        check_ownership(document_id, entries)?;
        let prepared = prepare_entries(entries, self.dims)?;
        let mut state = self.write()?;
        state.entries.retain(|s| s.entry.document_id != document_id);
        for entry in prepared {
            state.push(entry);
        }
        Ok(())
    }

    async fn search(&self, query_vector: &[f32], top_k: usize) -> Result<Vec<ScoredEntry>> {
        check_query(query_vector, self.dims)?;
        let k = top_k.min(self.max_top_k);
        if k == 0 {
            return Ok(Vec::new());
        }

        let state = self.read()?;
        let hits = state
            .entries
            .iter()
            .map(|s| {
                (
                    s.seq,
                    ScoredEntry {
                        entry: s.entry.clone(),
                        score: cosine_similarity(query_vector, &s.entry.vector),
                    },
                )
            })
            .collect();
        Ok(rank(hits, k))
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<usize> {
        let mut state = self.write()?;
        let before = state.entries.len();
        state.entries.retain(|s| s.entry.document_id != document_id);
        Ok(before - state.entries.len())
    }

    async fn clear(&self) -> Result<()> {
        self.write()?.entries.clear();
        Ok(())
    }

    async fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
        let state = self.read()?;
        Ok(summarize(state.entries.iter().map(|s| &s.entry)))
    }

    async fn document_chunks(&self, document_id: &str) -> Result<Option<DocumentChunks>> {
        let state = self.read()?;
        let mut owned: Vec<&IndexEntry> = state
            .entries
            .iter()
            .map(|s| &s.entry)
            .filter(|e| e.document_id == document_id)
            .collect();
        if owned.is_empty() {
            return Ok(None);
        }
        owned.sort_by_key(|e| e.chunk_index);

        let summary = summarize(owned.iter().copied()).remove(0);
        let chunks = owned
            .into_iter()
            .map(|e| StoredChunk {
                chunk_id: e.chunk_id.clone(),
                chunk_index: e.chunk_index,
                start: e.start,
                end: e.end,
                hash: e.hash.clone(),
                text: e.text.clone(),
            })
            .collect();
        Ok(Some(DocumentChunks { summary, chunks }))
    }

    async fn stats(&self) -> Result<StoreStats> {
        let state = self.read()?;
        let mut by_type: BTreeMap<String, usize> = BTreeMap::new();
        for s in &state.entries {
            *by_type
                .entry(s.entry.source_type.as_str().to_string())
                .or_default() += 1;
        }
        Ok(StoreStats {
            total_documents: summarize(state.entries.iter().map(|s| &s.entry)).len(),
            total_chunks: state.entries.len(),
            chunks_by_type: by_type.into_iter().collect(),
            dims: self.dims,
        })
    }
}
