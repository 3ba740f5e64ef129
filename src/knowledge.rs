//! The [`KnowledgeBase`] facade.
//!
//! Wires one vector store, one embedding gateway and one generation gateway
//! into the operations exposed by the CLI and HTTP server:
//!
//! | Operation | Store access |
//! |-----------|--------------|
//! | [`ingest`](KnowledgeBase::ingest) | collection gate (shared) + document lock |
//! | [`delete_document`](KnowledgeBase::delete_document) | collection gate (shared) + document lock |
//! | [`clear_all`](KnowledgeBase::clear_all) | collection gate (exclusive) |
//! | [`query`](KnowledgeBase::query), [`ask`](KnowledgeBase::ask) | reads only |
//! | [`list_documents`](KnowledgeBase::list_documents), [`get_document`](KnowledgeBase::get_document), [`stats`](KnowledgeBase::stats) | reads only |
//!
//! Reads never wait on the gate, so a slow embedding call during ingestion
//! does not stall queries.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::config::Config;
use crate::context::{assemble, RetrievalContext};
use crate::embedding::{create_gateway, EmbeddingGateway};
use crate::error::{Error, Result};
use crate::generation::{build_prompt, create_generator, GenerationGateway, GenerationOptions};
use crate::ingest::{document_id_for, DocumentLocks, IngestReport, Ingestor, Upload};
use crate::models::{DocumentChunks, DocumentSummary, QueryResult, StoreStats};
use crate::retrieval::Retriever;
use crate::store::memory::InMemoryStore;
use crate::store::sqlite::SqliteStore;
use crate::store::VectorStore;

/// Returned by [`KnowledgeBase::ask`] when nothing relevant was retrieved.
pub const NO_CONTEXT_ANSWER: &str =
    "I couldn't find any relevant documents to answer this question.";

/// Retrieval output: ranked hits plus the assembled context.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub results: Vec<QueryResult>,
    pub context: RetrievalContext,
}

/// Per-request overrides for [`KnowledgeBase::ask`].
#[derive(Debug, Clone, Default)]
pub struct AskOptions {
    pub top_k: Option<usize>,
    pub similarity_floor: Option<f32>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// A chunk cited by an answer.
#[derive(Debug, Clone, Serialize)]
pub struct Source {
    pub rank: usize,
    pub chunk_id: String,
    pub document_id: String,
    pub filename: String,
    pub score: f32,
    pub start: usize,
    pub end: usize,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnswerMetadata {
    pub query: String,
    pub top_k: usize,
    pub temperature: f32,
    pub max_tokens: u32,
    pub model: String,
    pub chunks_used: usize,
    pub context_size: usize,
}

/// Generated answer with its sources.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<Source>,
    pub metadata: AnswerMetadata,
}

/// Retrieval-augmented question answering over an indexed collection.
pub struct KnowledgeBase {
    store: Arc<dyn VectorStore>,
    ingestor: Ingestor,
    retriever: Retriever,
    generator: Arc<dyn GenerationGateway>,
    locks: DocumentLocks,
    gate: RwLock<()>,
    default_top_k: usize,
    max_context_size: usize,
    generation: GenerationOptions,
    generation_timeout: Duration,
}

impl KnowledgeBase {
    /// Assemble a knowledge base from explicit parts.
    pub fn new(
        config: &Config,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingGateway>,
        generator: Arc<dyn GenerationGateway>,
    ) -> Self {
        let embed_timeout = Duration::from_secs(config.embedding.timeout_secs);
        Self {
            ingestor: Ingestor::new(
                store.clone(),
                embedder.clone(),
                config.chunking.params(),
                embed_timeout,
            ),
            retriever: Retriever::new(store.clone(), embedder, &config.retrieval, embed_timeout),
            store,
            generator,
            locks: DocumentLocks::new(),
            gate: RwLock::new(()),
            default_top_k: config.retrieval.default_top_k,
            max_context_size: config.retrieval.max_context_size,
            generation: GenerationOptions {
                temperature: config.generation.temperature,
                max_tokens: config.generation.max_tokens,
            },
            generation_timeout: Duration::from_secs(config.generation.timeout_secs),
        }
    }

    /// Open the configured store and gateways.
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let dims = config.embedding.effective_dims();
        let store: Arc<dyn VectorStore> = match config.store.backend.as_str() {
            "memory" => Arc::new(InMemoryStore::new(dims, config.store.max_top_k)),
            _ => Arc::new(SqliteStore::open(&config.store.path, dims, config.store.max_top_k).await?),
        };
        let embedder: Arc<dyn EmbeddingGateway> = Arc::from(create_gateway(&config.embedding)?);
        let generator: Arc<dyn GenerationGateway> =
            Arc::from(create_generator(&config.generation)?);

        tracing::debug!(
            backend = %config.store.backend,
            dims = store.dims(),
            embedder = embedder.model_name(),
            generator = generator.model_name(),
            "knowledge base opened"
        );
        Ok(Self::new(config, store, embedder, generator))
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Ingest one upload. Replaces an earlier document with the same filename.
    pub async fn ingest(&self, upload: Upload) -> Result<IngestReport> {
        let _gate = self.gate.read().await;
        let _doc = self.locks.lock(&document_id_for(&upload.filename)).await;
        self.ingestor.ingest(upload).await
    }

    /// Retrieve ranked chunks and assemble them into a context.
    pub async fn query(
        &self,
        text: &str,
        top_k: Option<usize>,
        similarity_floor: Option<f32>,
    ) -> Result<QueryResponse> {
        let results = self.retriever.retrieve(text, top_k, similarity_floor).await?;
        let context = assemble(&results, self.max_context_size);
        Ok(QueryResponse { results, context })
    }

    /// Answer `question` from retrieved context.
    ///
    /// With no usable context the model is not called and
    /// [`NO_CONTEXT_ANSWER`] is returned.
    pub async fn ask(&self, question: &str, options: &AskOptions) -> Result<Answer> {
        let generation = GenerationOptions {
            temperature: options.temperature.unwrap_or(self.generation.temperature),
            max_tokens: options.max_tokens.unwrap_or(self.generation.max_tokens),
        };
        validate_generation(&generation)?;
        let top_k = options.top_k.unwrap_or(self.default_top_k);

        let QueryResponse { results, context } = self
            .query(question, Some(top_k), options.similarity_floor)
            .await?;

        let answer = if context.is_empty() {
            tracing::info!(results = results.len(), "no usable context, skipping generation");
            NO_CONTEXT_ANSWER.to_string()
        } else {
            let prompt = build_prompt(&context.text, question);
            tokio::time::timeout(
                self.generation_timeout,
                self.generator.generate(&prompt, &generation),
            )
            .await
            .map_err(|_| {
                Error::Generation(format!(
                    "{} did not respond within {}s",
                    self.generator.model_name(),
                    self.generation_timeout.as_secs()
                ))
            })??
        };

        let sources = results
            .iter()
            .take(context.entries.len())
            .map(|r| Source {
                rank: r.rank,
                chunk_id: r.chunk_id.clone(),
                document_id: r.document_id.clone(),
                filename: r.filename.clone(),
                score: r.score,
                start: r.start,
                end: r.end,
                content: r.text.clone(),
            })
            .collect();

        Ok(Answer {
            answer,
            sources,
            metadata: AnswerMetadata {
                query: question.to_string(),
                top_k,
                temperature: generation.temperature,
                max_tokens: generation.max_tokens,
                model: self.generator.model_name().to_string(),
                chunks_used: context.entries.len(),
                context_size: context.size,
            },
        })
    }

    /// Remove a document. Returns `false` if it was not indexed.
    pub async fn delete_document(&self, document_id: &str) -> Result<bool> {
        let _gate = self.gate.read().await;
        let _doc = self.locks.lock(document_id).await;
        let removed = self.store.delete_by_document(document_id).await?;
        tracing::info!(document_id, removed, "deleted document");
        Ok(removed > 0)
    }

    /// Remove every document, after in-flight writes finish.
    pub async fn clear_all(&self) -> Result<()> {
        let _gate = self.gate.write().await;
        self.store.clear().await?;
        tracing::info!("cleared all documents");
        Ok(())
    }

    pub async fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
        self.store.list_documents().await
    }

    pub async fn get_document(&self, document_id: &str) -> Result<Option<DocumentChunks>> {
        self.store.document_chunks(document_id).await
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        self.store.stats().await
    }
}

fn validate_generation(options: &GenerationOptions) -> Result<()> {
    if !options.temperature.is_finite() || !(0.0..=2.0).contains(&options.temperature) {
        return Err(Error::Query(format!(
            "temperature must be within [0, 2], got {}",
            options.temperature
        )));
    }
    if options.max_tokens == 0 {
        return Err(Error::Query("max_tokens must be at least 1".to_string()));
    }
    Ok(())
}
