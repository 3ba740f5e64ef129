//! HTTP API over the [`KnowledgeBase`].
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Banner with version |
//! | `GET`  | `/health` | Health check |
//! | `POST` | `/query` | Retrieve and generate an answer |
//! | `POST` | `/retrieve` | Retrieve ranked chunks and context, no generation |
//! | `POST` | `/documents` | Ingest a document (plain or base64 content) |
//! | `POST` | `/upload-documents` | Ingest a batch, reporting each document |
//! | `GET`  | `/documents` | List indexed documents |
//! | `GET`  | `/documents/{id}` | One document's chunks |
//! | `DELETE` | `/documents/{id}` | Delete a document |
//! | `POST` | `/clear-documents` | Delete everything |
//! | `GET`  | `/stats` | Collection counts |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "invalid query: query must not be empty" } }
//! ```
//!
//! | Code | Status |
//! |------|--------|
//! | `bad_request`, `unsupported_file_type` | 400 |
//! | `not_found` | 404 |
//! | `embedding_service`, `generation` | 502 |
//! | `vector_store`, `internal` | 500 |
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser front-ends can
//! call the API directly.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::error::Error;
use crate::ingest::{IngestReport, Upload};
use crate::knowledge::{Answer, AskOptions, KnowledgeBase, QueryResponse};
use crate::models::{ChunkingParams, DocumentChunks, DocumentSummary, StoreStats};

#[derive(Clone)]
struct AppState {
    kb: Arc<KnowledgeBase>,
    chunking: ChunkingParams,
}

/// Build the router. Separate from [`run_server`] so tests can drive it
/// without binding a socket.
pub fn router(kb: Arc<KnowledgeBase>, chunking: ChunkingParams) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/query", post(handle_query))
        .route("/retrieve", post(handle_retrieve))
        .route("/documents", get(handle_list).post(handle_upload))
        .route("/upload-documents", post(handle_upload_batch))
        .route("/documents/{id}", get(handle_get).delete(handle_delete))
        .route("/clear-documents", post(handle_clear))
        .route("/stats", get(handle_stats))
        .layer(cors)
        .with_state(AppState { kb, chunking })
}

/// Open the knowledge base and serve until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let kb = Arc::new(KnowledgeBase::open(config).await?);
    let app = router(kb, config.chunking.params());

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "server listening");
    println!("kbase API listening on http://{}", config.server.bind);

    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let status = match err.code() {
            "bad_request" | "unsupported_file_type" => StatusCode::BAD_REQUEST,
            "embedding_service" | "generation" => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        }
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

// ============ GET / and /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "message": "kbase retrieval API",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /query, POST /retrieve ============

#[derive(Deserialize)]
struct QueryRequest {
    query: String,
    top_k: Option<usize>,
    similarity_floor: Option<f32>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

async fn handle_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<Answer>, AppError> {
    let options = AskOptions {
        top_k: req.top_k,
        similarity_floor: req.similarity_floor,
        temperature: req.temperature,
        max_tokens: req.max_tokens,
    };
    Ok(Json(state.kb.ask(&req.query, &options).await?))
}

#[derive(Deserialize)]
struct RetrieveRequest {
    query: String,
    top_k: Option<usize>,
    similarity_floor: Option<f32>,
}

async fn handle_retrieve(
    State(state): State<AppState>,
    Json(req): Json<RetrieveRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    Ok(Json(
        state
            .kb
            .query(&req.query, req.top_k, req.similarity_floor)
            .await?,
    ))
}

// ============ /documents ============

#[derive(Deserialize)]
struct UploadRequest {
    filename: String,
    content: Option<String>,
    content_base64: Option<String>,
    chunk_size: Option<usize>,
    chunk_overlap: Option<usize>,
}

async fn handle_upload(
    State(state): State<AppState>,
    Json(req): Json<UploadRequest>,
) -> Result<Json<IngestReport>, AppError> {
    let bytes = decode_content(&req.filename, req.content, req.content_base64)?;
    let mut upload = Upload::new(req.filename, bytes);
    if let Some(params) = state.override_params(req.chunk_size, req.chunk_overlap) {
        upload = upload.with_params(params);
    }
    Ok(Json(state.kb.ingest(upload).await?))
}

impl AppState {
    /// Request-level chunking overrides, filled in from the configured defaults.
    fn override_params(
        &self,
        chunk_size: Option<usize>,
        chunk_overlap: Option<usize>,
    ) -> Option<ChunkingParams> {
        if chunk_size.is_none() && chunk_overlap.is_none() {
            return None;
        }
        Some(ChunkingParams {
            chunk_size: chunk_size.unwrap_or(self.chunking.chunk_size),
            chunk_overlap: chunk_overlap.unwrap_or(self.chunking.chunk_overlap),
        })
    }
}

fn decode_content(
    filename: &str,
    content: Option<String>,
    content_base64: Option<String>,
) -> Result<Vec<u8>, AppError> {
    if filename.trim().is_empty() {
        return Err(bad_request("filename must not be empty"));
    }
    match (content, content_base64) {
        (Some(text), None) => Ok(text.into_bytes()),
        (None, Some(encoded)) => base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| {
                bad_request(format!(
                    "content_base64 of {} is not valid base64: {}",
                    filename, e
                ))
            }),
        _ => Err(bad_request(format!(
            "exactly one of content or content_base64 is required for {}",
            filename
        ))),
    }
}

#[derive(Deserialize)]
struct BatchDocument {
    filename: String,
    content: Option<String>,
    content_base64: Option<String>,
}

#[derive(Deserialize)]
struct BatchUploadRequest {
    documents: Vec<BatchDocument>,
    chunk_size: Option<usize>,
    chunk_overlap: Option<usize>,
}

#[derive(Serialize)]
struct BatchFailure {
    filename: String,
    code: String,
    message: String,
}

#[derive(Serialize)]
struct BatchUploadResponse {
    message: String,
    document_count: usize,
    document_names: Vec<String>,
    documents: Vec<IngestReport>,
    errors: Vec<BatchFailure>,
}

/// Ingest every document in order. A malformed entry rejects the whole
/// request before anything is stored; ingestion failures are reported per
/// document and do not stop the rest of the batch.
async fn handle_upload_batch(
    State(state): State<AppState>,
    Json(req): Json<BatchUploadRequest>,
) -> Result<Json<BatchUploadResponse>, AppError> {
    if req.documents.is_empty() {
        return Err(bad_request("documents must not be empty"));
    }
    let params = state.override_params(req.chunk_size, req.chunk_overlap);

    let mut uploads = Vec::with_capacity(req.documents.len());
    for doc in req.documents {
        let bytes = decode_content(&doc.filename, doc.content, doc.content_base64)?;
        let upload = Upload::new(doc.filename, bytes);
        uploads.push(match params {
            Some(p) => upload.with_params(p),
            None => upload,
        });
    }

    let mut documents = Vec::new();
    let mut errors = Vec::new();
    for upload in uploads {
        let filename = upload.filename.clone();
        match state.kb.ingest(upload).await {
            Ok(report) => documents.push(report),
            Err(e) => errors.push(BatchFailure {
                filename,
                code: e.code().to_string(),
                message: e.to_string(),
            }),
        }
    }

    tracing::info!(
        ingested = documents.len(),
        failed = errors.len(),
        "batch upload finished"
    );
    Ok(Json(BatchUploadResponse {
        message: format!("Successfully processed {} documents", documents.len()),
        document_count: documents.len(),
        document_names: documents.iter().map(|d| d.filename.clone()).collect(),
        documents,
        errors,
    }))
}

#[derive(Serialize)]
struct DocumentList {
    documents: Vec<DocumentSummary>,
    total: usize,
}

async fn handle_list(State(state): State<AppState>) -> Result<Json<DocumentList>, AppError> {
    let documents = state.kb.list_documents().await?;
    Ok(Json(DocumentList {
        total: documents.len(),
        documents,
    }))
}

async fn handle_get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DocumentChunks>, AppError> {
    state
        .kb
        .get_document(&id)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(format!("document not found: {}", id)))
}

async fn handle_delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    if !state.kb.delete_document(&id).await? {
        return Err(not_found(format!("document not found: {}", id)));
    }
    Ok(Json(serde_json::json!({ "deleted": true, "document_id": id })))
}

async fn handle_clear(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    state.kb.clear_all().await?;
    Ok(Json(serde_json::json!({ "message": "All documents cleared" })))
}

async fn handle_stats(State(state): State<AppState>) -> Result<Json<StoreStats>, AppError> {
    Ok(Json(state.kb.stats().await?))
}
