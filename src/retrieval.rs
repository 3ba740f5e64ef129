//! Query-time retrieval: embed, search, filter, rank.
//!
//! ```text
//! query text ─▶ validate ─▶ embed (timeout) ─▶ store.search(top_k) ─▶ floor ─▶ ranks 1..n
//! ```
//!
//! Parameter errors are reported before the gateway is called. A gateway
//! failure or timeout yields [`Error::EmbeddingService`] and no results.

use std::sync::Arc;
use std::time::Duration;

use crate::config::RetrievalConfig;
use crate::embedding::{embed_query, EmbeddingGateway};
use crate::error::{Error, Result};
use crate::models::QueryResult;
use crate::store::VectorStore;

/// Retrieval engine bound to one store and one embedding gateway.
pub struct Retriever {
    store: Arc<dyn VectorStore>,
    gateway: Arc<dyn EmbeddingGateway>,
    default_top_k: usize,
    similarity_floor: Option<f32>,
    timeout: Duration,
}

impl Retriever {
    pub fn new(
        store: Arc<dyn VectorStore>,
        gateway: Arc<dyn EmbeddingGateway>,
        config: &RetrievalConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            gateway,
            default_top_k: config.default_top_k,
            similarity_floor: config.similarity_floor,
            timeout,
        }
    }

    /// Rank stored chunks against `query`.
    ///
    /// `top_k` and `similarity_floor` fall back to the configured defaults.
    /// `top_k` above the store's maximum is clamped, not rejected.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: Option<usize>,
        similarity_floor: Option<f32>,
    ) -> Result<Vec<QueryResult>> {
        let top_k = top_k.unwrap_or(self.default_top_k);
        let floor = similarity_floor.or(self.similarity_floor);
        validate_query(query, top_k, floor)?;

        let query_vec = embed_query(
            self.gateway.as_ref(),
            query,
            self.store.dims(),
            self.timeout,
        )
        .await?;

        let hits = self.store.search(&query_vec, top_k).await?;
        let candidates = hits.len();

        let results: Vec<QueryResult> = hits
            .into_iter()
            .filter(|hit| floor.map_or(true, |f| hit.score >= f))
            .enumerate()
            .map(|(i, hit)| QueryResult {
                chunk_id: hit.entry.chunk_id,
                score: hit.score,
                rank: i + 1,
                document_id: hit.entry.document_id,
                filename: hit.entry.filename,
                source_type: hit.entry.source_type,
                chunk_index: hit.entry.chunk_index,
                start: hit.entry.start,
                end: hit.entry.end,
                text: hit.entry.text,
            })
            .collect();

        tracing::debug!(
            top_k,
            candidates,
            returned = results.len(),
            floor = ?floor,
            "retrieved chunks"
        );
        Ok(results)
    }
}

/// Reject unusable query parameters.
pub fn validate_query(query: &str, top_k: usize, similarity_floor: Option<f32>) -> Result<()> {
    if query.trim().is_empty() {
        return Err(Error::Query("query must not be empty".to_string()));
    }
    if top_k == 0 {
        return Err(Error::Query("top_k must be at least 1".to_string()));
    }
    if let Some(floor) = similarity_floor {
        if !floor.is_finite() || !(-1.0..=1.0).contains(&floor) {
            return Err(Error::Query(format!(
                "similarity_floor must be within [-1, 1], got {}",
                floor
            )));
        }
    }
    Ok(())
}
