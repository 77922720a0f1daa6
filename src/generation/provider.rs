//! HTTP generation backend
//!
//! Speaks the OpenAI-compatible chat-completions API. The same wire format
//! covers hosted OpenAI, a local Ollama server and custom local endpoints; the
//! provider type only decides the base URL and whether an API key is required.

use crate::error::GenerationError;
use crate::generation::backend::{GenerationBackend, GenerationRequest};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OLLAMA_BASE_URL: &str = "http://localhost:11434";
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const ERROR_BODY_LIMIT: usize = 512;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    #[default]
    #[serde(rename = "openai")]
    OpenAI,
    Ollama,
    LocalCustom,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::OpenAI => "openai",
            ProviderType::Ollama => "ollama",
            ProviderType::LocalCustom => "local_custom",
        }
    }
}

/// Generation backend connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub provider_type: ProviderType,
    pub model: String,
    /// Read from `LECTERN_API_KEY` when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Base URL override; required for `local_custom`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Transport-level ceiling; per-attempt timeouts are enforced by the retry loop
    pub request_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider_type: ProviderType::OpenAI,
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            endpoint: None,
            temperature: Some(0.4),
            max_tokens: None,
            request_timeout_secs: 120,
        }
    }
}

impl ProviderConfig {
    /// Full chat-completions URL for this provider.
    pub fn completions_url(&self) -> Result<String, GenerationError> {
        let base = match (self.provider_type, self.endpoint.as_deref()) {
            (ProviderType::OpenAI, endpoint) => endpoint.unwrap_or(OPENAI_BASE_URL).to_string(),
            (ProviderType::Ollama, endpoint) => {
                format!("{}/v1", endpoint.unwrap_or(OLLAMA_BASE_URL).trim_end_matches('/'))
            }
            (ProviderType::LocalCustom, Some(endpoint)) => endpoint.to_string(),
            (ProviderType::LocalCustom, None) => {
                return Err(GenerationError::NotConfigured(
                    "local_custom provider requires an endpoint".to_string(),
                ))
            }
        };
        Ok(format!("{}/chat/completions", base.trim_end_matches('/')))
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

fn map_transport_error(error: reqwest::Error) -> GenerationError {
    if error.is_timeout() {
        GenerationError::Transport(format!("Request timeout: {}", error))
    } else if error.is_connect() {
        GenerationError::Transport(format!("Connection error: {}", error))
    } else {
        GenerationError::Transport(format!("HTTP error: {}", error))
    }
}

/// Map a non-success status to an attempt failure.
pub fn map_status(status: u16, body: &str) -> GenerationError {
    let body: String = body.chars().take(ERROR_BODY_LIMIT).collect();
    match status {
        401 | 403 => GenerationError::AuthFailed(format!("status {}: {}", status, body)),
        429 => GenerationError::RateLimited(body),
        _ => GenerationError::HttpStatus { status, body },
    }
}

pub struct HttpGenerationBackend {
    client: Client,
    provider_type: ProviderType,
    model: String,
    api_key: Option<String>,
    url: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl HttpGenerationBackend {
    pub fn from_config(config: &ProviderConfig) -> Result<Self, GenerationError> {
        if config.model.trim().is_empty() {
            return Err(GenerationError::NotConfigured(
                "provider model is empty".to_string(),
            ));
        }
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty());
        if config.provider_type == ProviderType::OpenAI && api_key.is_none() {
            return Err(GenerationError::NotConfigured(
                "openai provider requires an API key".to_string(),
            ));
        }
        let url = config.completions_url()?;
        let client = Client::builder()
            .no_proxy()
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()
            .map_err(|e| GenerationError::NotConfigured(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            provider_type: config.provider_type,
            model: config.model.clone(),
            api_key,
            url,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl GenerationBackend for HttpGenerationBackend {
    fn name(&self) -> &str {
        self.provider_type.as_str()
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: false,
        };

        let mut builder = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json");
        if let Some(api_key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", api_key));
        }
        let response = builder
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(map_status(status.as_u16(), &error_text));
        }

        let completion: ChatCompletionResponse = response.json().await.map_err(|e| {
            GenerationError::MalformedOutput(format!("Failed to parse response: {}", e))
        })?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(GenerationError::EmptyOutput);
        }
        Ok(content)
    }
}
