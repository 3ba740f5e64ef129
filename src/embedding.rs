//! Embedding gateway abstraction and implementations.
//!
//! Defines the [`EmbeddingGateway`] trait and concrete implementations:
//! - **[`DisabledGateway`]**: returns errors; used when embeddings are not configured.
//! - **[`OpenAiGateway`]**: calls an OpenAI-compatible `/v1/embeddings` endpoint,
//!   or an Azure OpenAI embeddings deployment.
//! - **[`OllamaGateway`]**: calls a local Ollama instance's `/api/embed` endpoint.
//! - **[`HashingGateway`]**: deterministic offline feature-hashing embedder.
//!
//! Also provides vector utilities:
//! - [`cosine_similarity`]: similarity between two embedding vectors
//! - [`normalize`]: scale a vector to unit length
//! - [`vec_to_blob`] / [`blob_to_vec`]: little-endian `f32` BLOB encoding
//!
//! # Retry Strategy
//!
//! The HTTP gateways retry transient errors with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, … (capped at 2^5), up to `max_retries` attempts
//!
//! Every retry is logged. The overall call is still bounded by the caller's
//! timeout, so a slow retry loop surfaces as a timeout rather than hanging.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

/// Maps text to fixed-length vectors.
///
/// Implementations must return exactly one vector per input text, in input
/// order, each of length [`dims`](EmbeddingGateway::dims).
#[async_trait]
pub trait EmbeddingGateway: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single query text under `timeout`.
pub async fn embed_query(
    gateway: &dyn EmbeddingGateway,
    text: &str,
    dims: usize,
    timeout: Duration,
) -> Result<Vec<f32>> {
    let results = embed_with_timeout(gateway, &[text.to_string()], dims, timeout).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| Error::EmbeddingService("empty embedding response".to_string()))
}

/// Embed `texts` under `timeout`, checking count and dimensionality.
///
/// A timeout is reported as [`Error::EmbeddingService`] like any other
/// gateway failure.
pub async fn embed_with_timeout(
    gateway: &dyn EmbeddingGateway,
    texts: &[String],
    dims: usize,
    timeout: Duration,
) -> Result<Vec<Vec<f32>>> {
    let vectors = tokio::time::timeout(timeout, gateway.embed(texts))
        .await
        .map_err(|_| {
            Error::EmbeddingService(format!(
                "{} did not respond within {}s",
                gateway.model_name(),
                timeout.as_secs_f32()
            ))
        })??;
    check_embeddings(&vectors, texts.len(), dims)?;
    Ok(vectors)
}

/// Check that a gateway response has one vector of the right size per input.
pub fn check_embeddings(vectors: &[Vec<f32>], expected: usize, dims: usize) -> Result<()> {
    if vectors.len() != expected {
        return Err(Error::EmbeddingService(format!(
            "expected {} embeddings, got {}",
            expected,
            vectors.len()
        )));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
        return Err(Error::EmbeddingService(format!(
            "expected {}-dimensional embeddings, got {}",
            dims,
            bad.len()
        )));
    }
    Ok(())
}

// ============ Disabled Gateway ============

/// A no-op gateway that always fails.
///
/// Used when `embedding.provider = "disabled"` in the configuration.
pub struct DisabledGateway;

#[async_trait]
impl EmbeddingGateway for DisabledGateway {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(Error::EmbeddingService(
            "embedding provider is disabled; set [embedding] provider in config".to_string(),
        ))
    }
}

// ============ OpenAI / Azure Gateway ============

/// Where an [`OpenAiGateway`] sends its requests.
#[derive(Debug, Clone)]
enum OpenAiFlavor {
    /// `POST {base}/v1/embeddings` with a bearer token.
    OpenAi { base_url: String },
    /// `POST {endpoint}/openai/deployments/{model}/embeddings?api-version=…` with an `api-key` header.
    Azure {
        endpoint: String,
        api_version: String,
    },
}

/// Embedding gateway for the OpenAI API or an Azure OpenAI deployment.
///
/// Reads the key from `OPENAI_API_KEY` (OpenAI) or `AZURE_OPENAI_API_KEY`
/// (Azure) at construction time.
pub struct OpenAiGateway {
    model: String,
    dims: usize,
    batch_size: usize,
    max_retries: u32,
    api_key: String,
    flavor: OpenAiFlavor,
    client: reqwest::Client,
}

impl OpenAiGateway {
    /// Create an OpenAI (or OpenAI-compatible, via `url`) gateway.
    pub fn openai(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let base_url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string());
        Self::build(config, api_key, OpenAiFlavor::OpenAi { base_url })
    }

    /// Create an Azure OpenAI gateway; `model` is the deployment name.
    pub fn azure(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var("AZURE_OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("AZURE_OPENAI_API_KEY environment variable not set"))?;
        let endpoint = config
            .url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.url (Azure endpoint) required for azure provider"))?;
        let api_version = config.api_version.clone();
        Self::build(
            config,
            api_key,
            OpenAiFlavor::Azure {
                endpoint,
                api_version,
            },
        )
    }

    fn build(config: &EmbeddingConfig, api_key: String, flavor: OpenAiFlavor) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model,
            dims,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            api_key,
            flavor,
            client,
        })
    }

    fn request(&self, body: &serde_json::Value) -> reqwest::RequestBuilder {
        match &self.flavor {
            OpenAiFlavor::OpenAi { base_url } => self
                .client
                .post(format!("{}/v1/embeddings", base_url.trim_end_matches('/')))
                .bearer_auth(&self.api_key)
                .json(body),
            OpenAiFlavor::Azure {
                endpoint,
                api_version,
            } => self
                .client
                .post(format!(
                    "{}/openai/deployments/{}/embeddings?api-version={}",
                    endpoint.trim_end_matches('/'),
                    self.model,
                    api_version
                ))
                .header("api-key", &self.api_key)
                .json(body),
        }
    }
}

#[async_trait]
impl EmbeddingGateway for OpenAiGateway {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let body = serde_json::json!({
                "model": self.model,
                "input": batch,
            });
            let json = send_with_retry("OpenAI", self.max_retries, || self.request(&body))
                .await
                .map_err(Error::EmbeddingService)?;
            out.extend(parse_openai_response(&json)?);
        }
        Ok(out)
    }
}

/// Send a JSON request, retrying 429/5xx and network errors with backoff.
pub(crate) async fn send_with_retry<F>(
    service: &str,
    max_retries: u32,
    make_request: F,
) -> std::result::Result<serde_json::Value, String>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::warn!(
                service,
                attempt,
                delay_secs = delay.as_secs(),
                error = last_err.as_deref().unwrap_or(""),
                "retrying request"
            );
            tokio::time::sleep(delay).await;
        }

        match make_request().send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response
                        .json::<serde_json::Value>()
                        .await
                        .map_err(|e| format!("{} returned invalid JSON: {}", service, e));
                }

                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(format!("{} API error {}: {}", service, status, body_text));
                    continue;
                }

                return Err(format!("{} API error {}: {}", service, status, body_text));
            }
            Err(e) => {
                last_err = Some(format!("{} connection error: {}", service, e));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| format!("{} request failed after retries", service)))
}

/// Parse the OpenAI embeddings response, ordering vectors by `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| Error::EmbeddingService("invalid response: missing data array".into()))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| Error::EmbeddingService("invalid response: missing embedding".into()))?;
        indexed.push((index, json_to_vec(embedding)?));
    }

    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

fn json_to_vec(values: &[serde_json::Value]) -> Result<Vec<f32>> {
    values
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| Error::EmbeddingService("invalid response: non-numeric embedding value".into()))
        })
        .collect()
}

// ============ Ollama Gateway ============

/// Embedding gateway using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured URL (default: `http://localhost:11434`).
pub struct OllamaGateway {
    model: String,
    dims: usize,
    url: String,
    batch_size: usize,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaGateway {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            dims,
            url,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl EmbeddingGateway for OllamaGateway {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let endpoint = format!("{}/api/embed", self.url.trim_end_matches('/'));
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let body = serde_json::json!({
                "model": self.model,
                "input": batch,
            });
            let json = send_with_retry("Ollama", self.max_retries, || {
                self.client.post(&endpoint).json(&body)
            })
            .await
            .map_err(Error::EmbeddingService)?;
            out.extend(parse_ollama_response(&json)?);
        }
        Ok(out)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| Error::EmbeddingService("invalid Ollama response: missing embeddings array".into()))?;

    embeddings
        .iter()
        .map(|embedding| {
            let values = embedding.as_array().ok_or_else(|| {
                Error::EmbeddingService("invalid Ollama response: embedding is not an array".into())
            })?;
            json_to_vec(values)
        })
        .collect()
}

// ============ Hashing Gateway ============

/// Deterministic, offline embedder based on feature hashing.
///
/// Each lowercase alphanumeric token is hashed with SHA-256; the first four
/// bytes pick a dimension and the fifth a sign. Texts sharing vocabulary get
/// similar vectors. Useful for local trials and tests without a model.
pub struct HashingGateway {
    dims: usize,
}

impl HashingGateway {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    /// Embed one text synchronously.
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let bucket = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]) as usize
                % self.dims;
            let sign = if digest[4] & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        normalize(&mut v);
        v
    }
}

#[async_trait]
impl EmbeddingGateway for HashingGateway {
    fn model_name(&self) -> &str {
        "hashing"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Create the appropriate [`EmbeddingGateway`] based on configuration.
///
/// | Config Value | Gateway |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledGateway`] |
/// | `"openai"` | [`OpenAiGateway::openai`] |
/// | `"azure"` | [`OpenAiGateway::azure`] |
/// | `"ollama"` | [`OllamaGateway`] |
/// | `"hashing"` | [`HashingGateway`] |
pub fn create_gateway(config: &EmbeddingConfig) -> anyhow::Result<Box<dyn EmbeddingGateway>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledGateway)),
        "openai" => Ok(Box::new(OpenAiGateway::openai(config)?)),
        "azure" => Ok(Box::new(OpenAiGateway::azure(config)?)),
        "ollama" => Ok(Box::new(OllamaGateway::new(config)?)),
        "hashing" => Ok(Box::new(HashingGateway::new(config.dims.unwrap_or(256)))),
        other => anyhow::bail!("Unknown embedding provider: {}", other),
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// # Example
///
/// ```rust
/// use kbase::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), Some(v));
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
///
/// Returns `None` when the length is not a multiple of four (corrupt row).
pub fn blob_to_vec(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}

/// Scale `v` to unit length in place. Zero vectors are left unchanged.
pub fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm < f32::EPSILON {
        return;
    }
    for x in v.iter_mut() {
        *x /= norm;
    }
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`; `0.0` for empty vectors, zero vectors,
/// or vectors of different lengths.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
