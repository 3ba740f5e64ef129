//! TOML configuration parsing and validation.
//!
//! Configuration is loaded once at startup and validated at the boundary;
//! the rest of the crate trusts the resulting [`Config`].
//!
//! ```toml
//! [store]
//! path = "./data/kbase.sqlite"
//!
//! [chunking]
//! chunk_size = 1000
//! chunk_overlap = 200
//!
//! [retrieval]
//! default_top_k = 5
//! max_context_size = 4000
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [generation]
//! provider = "openai"
//! model = "gpt-4o-mini"
//!
//! [server]
//! bind = "127.0.0.1:8000"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::models::ChunkingParams;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub store: StoreConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
    /// `"sqlite"` (persistent) or `"memory"` (lost on exit).
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Upper bound for `top_k`; larger requests are clamped.
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,
}

fn default_backend() -> String {
    "sqlite".to_string()
}
fn default_max_top_k() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

impl ChunkingConfig {
    pub fn params(&self) -> ChunkingParams {
        ChunkingParams {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
    /// Character budget for the assembled prompt context.
    #[serde(default = "default_max_context_size")]
    pub max_context_size: usize,
    /// Drop results scoring below this cosine similarity. Unset keeps all.
    #[serde(default)]
    pub similarity_floor: Option<f32>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_top_k: default_top_k(),
            max_context_size: default_max_context_size(),
            similarity_floor: None,
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_max_context_size() -> usize {
    4000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL: OpenAI-compatible base, Azure endpoint, or Ollama URL.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            api_version: default_api_version(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    /// Vector dimensionality the store must enforce (0 when disabled).
    pub fn effective_dims(&self) -> usize {
        if !self.is_enabled() {
            return 0;
        }
        match (self.provider.as_str(), self.dims) {
            ("hashing", None) => 256,
            (_, dims) => dims.unwrap_or(0),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_api_version() -> String {
    "2024-02-15-preview".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    2
}
fn default_embedding_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            api_version: default_api_version(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_retries: default_max_retries(),
            timeout_secs: default_generation_timeout(),
        }
    }
}

fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1000
}
fn default_generation_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

impl Config {
    /// Validate every section. Called by [`load_config`].
    pub fn validate(&self) -> Result<()> {
        // Store
        match self.store.backend.as_str() {
            "sqlite" | "memory" => {}
            other => anyhow::bail!(
                "Unknown store backend: '{}'. Must be sqlite or memory.",
                other
            ),
        }
        if self.store.max_top_k == 0 {
            anyhow::bail!("store.max_top_k must be >= 1");
        }

        // Chunking
        crate::chunk::validate_params(&self.chunking.params())
            .map_err(|e| anyhow::anyhow!("chunking: {}", e))?;

        // Retrieval
        if self.retrieval.default_top_k == 0 {
            anyhow::bail!("retrieval.default_top_k must be >= 1");
        }
        if self.retrieval.max_context_size == 0 {
            anyhow::bail!("retrieval.max_context_size must be > 0");
        }
        if let Some(floor) = self.retrieval.similarity_floor {
            if !(-1.0..=1.0).contains(&floor) {
                anyhow::bail!("retrieval.similarity_floor must be in [-1.0, 1.0]");
            }
        }

        // Embedding
        match self.embedding.provider.as_str() {
            "disabled" | "hashing" => {}
            "openai" | "azure" | "ollama" => {
                if self.embedding.model.is_none() {
                    anyhow::bail!(
                        "embedding.model must be specified when provider is '{}'",
                        self.embedding.provider
                    );
                }
                if self.embedding.dims.is_none() {
                    anyhow::bail!(
                        "embedding.dims must be > 0 when provider is '{}'",
                        self.embedding.provider
                    );
                }
                if self.embedding.provider == "azure" && self.embedding.url.is_none() {
                    anyhow::bail!("embedding.url (Azure endpoint) is required for provider 'azure'");
                }
            }
            other => anyhow::bail!(
                "Unknown embedding provider: '{}'. Must be disabled, openai, azure, ollama, or hashing.",
                other
            ),
        }
        if self.embedding.dims == Some(0) {
            anyhow::bail!("embedding.dims must be > 0");
        }
        if self.embedding.batch_size == 0 {
            anyhow::bail!("embedding.batch_size must be >= 1");
        }

        // Generation
        match self.generation.provider.as_str() {
            "disabled" => {}
            "openai" | "azure" | "ollama" => {
                if self.generation.model.is_none() {
                    anyhow::bail!(
                        "generation.model must be specified when provider is '{}'",
                        self.generation.provider
                    );
                }
                if self.generation.provider == "azure" && self.generation.url.is_none() {
                    anyhow::bail!("generation.url (Azure endpoint) is required for provider 'azure'");
                }
            }
            other => anyhow::bail!(
                "Unknown generation provider: '{}'. Must be disabled, openai, azure, or ollama.",
                other
            ),
        }
        if !(0.0..=2.0).contains(&self.generation.temperature) {
            anyhow::bail!("generation.temperature must be in [0.0, 2.0]");
        }
        if self.generation.max_tokens == 0 {
            anyhow::bail!("generation.max_tokens must be >= 1");
        }

        Ok(())
    }
}
