//! Answer generation gateway.
//!
//! Defines the [`GenerationGateway`] trait used by
//! [`KnowledgeBase::ask`](crate::knowledge::KnowledgeBase::ask) to turn an
//! assembled context and a question into a natural-language answer.
//!
//! | Provider | Endpoint |
//! |----------|----------|
//! | `disabled` | none, every call fails |
//! | `openai` | `POST {url}/v1/chat/completions` |
//! | `azure` | `POST {endpoint}/openai/deployments/{model}/chat/completions` |
//! | `ollama` | `POST {url}/api/chat` |
//!
//! HTTP providers share the retry loop of the embedding gateways.

use async_trait::async_trait;
use std::time::Duration;

use crate::config::GenerationConfig;
use crate::embedding::send_with_retry;
use crate::error::{Error, Result};

/// Sampling knobs for one generation call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Produces an answer for a fully rendered prompt.
#[async_trait]
pub trait GenerationGateway: Send + Sync {
    fn model_name(&self) -> &str;
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String>;
}

/// Render the question-answering prompt.
///
/// The model is told to rely on `context` alone and to admit when the
/// answer is not there.
pub fn build_prompt(context: &str, question: &str) -> String {
    format!(
        "You are a helpful AI assistant that answers questions based on the provided context.\n\
         Use the following pieces of context to answer the question at the end.\n\
         If you don't know the answer, just say that you don't know, don't try to make up an answer.\n\
         \n\
         Context:\n{}\n\
         \n\
         Question: {}\n\
         \n\
         Answer:",
        context, question
    )
}

// ============ Disabled Gateway ============

/// Used when `generation.provider = "disabled"`.
pub struct DisabledGenerator;

#[async_trait]
impl GenerationGateway for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn generate(&self, _prompt: &str, _options: &GenerationOptions) -> Result<String> {
        Err(Error::Generation(
            "generation provider is disabled; set [generation] provider in config".to_string(),
        ))
    }
}

// ============ OpenAI / Azure Chat ============

enum ChatEndpoint {
    OpenAi { base_url: String },
    Azure { endpoint: String, api_version: String },
}

/// Chat-completions gateway for OpenAI or an Azure OpenAI deployment.
pub struct OpenAiChatGenerator {
    model: String,
    max_retries: u32,
    api_key: String,
    endpoint: ChatEndpoint,
    client: reqwest::Client,
}

impl OpenAiChatGenerator {
    pub fn openai(config: &GenerationConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let base_url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string());
        Self::build(config, api_key, ChatEndpoint::OpenAi { base_url })
    }

    /// `model` is the Azure deployment name.
    pub fn azure(config: &GenerationConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var("AZURE_OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("AZURE_OPENAI_API_KEY environment variable not set"))?;
        let endpoint = config.url.clone().ok_or_else(|| {
            anyhow::anyhow!("generation.url (Azure endpoint) required for azure provider")
        })?;
        Self::build(
            config,
            api_key,
            ChatEndpoint::Azure {
                endpoint,
                api_version: config.api_version.clone(),
            },
        )
    }

    fn build(config: &GenerationConfig, api_key: String, endpoint: ChatEndpoint) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model,
            max_retries: config.max_retries,
            api_key,
            endpoint,
            client,
        })
    }

    fn request(&self, body: &serde_json::Value) -> reqwest::RequestBuilder {
        match &self.endpoint {
            ChatEndpoint::OpenAi { base_url } => self
                .client
                .post(format!("{}/v1/chat/completions", base_url.trim_end_matches('/')))
                .bearer_auth(&self.api_key)
                .json(body),
            ChatEndpoint::Azure {
                endpoint,
                api_version,
            } => self
                .client
                .post(format!(
                    "{}/openai/deployments/{}/chat/completions?api-version={}",
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
impl GenerationGateway for OpenAiChatGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": options.temperature,
            "max_tokens": options.max_tokens,
        });
        let json = send_with_retry("OpenAI chat", self.max_retries, || self.request(&body))
            .await
            .map_err(Error::Generation)?;

        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(|s| s.trim().to_string())
            .ok_or_else(|| Error::Generation("invalid response: missing choices[0].message.content".into()))
    }
}

// ============ Ollama Chat ============

/// Chat gateway for a local Ollama instance.
pub struct OllamaGenerator {
    model: String,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model,
            url,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl GenerationGateway for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String> {
        let endpoint = format!("{}/api/chat", self.url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "stream": false,
            "options": {
                "temperature": options.temperature,
                "num_predict": options.max_tokens,
            },
        });
        let json = send_with_retry("Ollama chat", self.max_retries, || {
            self.client.post(&endpoint).json(&body)
        })
        .await
        .map_err(Error::Generation)?;

        json.pointer("/message/content")
            .and_then(|c| c.as_str())
            .map(|s| s.trim().to_string())
            .ok_or_else(|| Error::Generation("invalid Ollama response: missing message.content".into()))
    }
}

/// Create the configured [`GenerationGateway`].
pub fn create_generator(config: &GenerationConfig) -> anyhow::Result<Box<dyn GenerationGateway>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledGenerator)),
        "openai" => Ok(Box::new(OpenAiChatGenerator::openai(config)?)),
        "azure" => Ok(Box::new(OpenAiChatGenerator::azure(config)?)),
        "ollama" => Ok(Box::new(OllamaGenerator::new(config)?)),
        other => anyhow::bail!("Unknown generation provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_contains_context_and_question() {
        let prompt = build_prompt("[1] a.txt (chars 0-5)\nhello", "What is said?");
        assert!(prompt.starts_with("You are a helpful AI assistant"));
        assert!(prompt.contains("don't know"));
        assert!(prompt.contains("[1] a.txt (chars 0-5)\nhello"));
        assert!(prompt.contains("Question: What is said?"));
        assert!(prompt.ends_with("Answer:"));
    }

    #[tokio::test]
    async fn test_disabled_generator_errors() {
        let opts = GenerationOptions {
            temperature: 0.7,
            max_tokens: 100,
        };
        let err = DisabledGenerator.generate("p", &opts).await.unwrap_err();
        assert!(matches!(err, Error::Generation(_)));
        assert_eq!(err.code(), "generation");
    }

    #[test]
    fn test_create_generator() {
        let config = GenerationConfig::default();
        let generator = create_generator(&config).unwrap();
        assert_eq!(generator.model_name(), "disabled");

        let config = GenerationConfig {
            provider: "bard".into(),
            ..Default::default()
        };
        assert!(create_generator(&config).is_err());

        let config = GenerationConfig {
            provider: "ollama".into(),
            model: Some("llama3".into()),
            ..Default::default()
        };
        assert_eq!(create_generator(&config).unwrap().model_name(), "llama3");
    }
}
