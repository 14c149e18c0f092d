/*!
 * Provider implementations for language model services.
 *
 * This module contains client implementations for various LLM providers:
 * - OpenAI: any OpenAI-compatible chat completions endpoint
 * - Anthropic: Anthropic messages API
 * - Ollama: local LLM server
 * - Mock: scripted provider for tests
 */

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;

use crate::app_config::{Config, ProviderKind};
use crate::errors::{ConfigError, ModelError};

pub mod anthropic;
pub mod mock;
pub mod ollama;
pub mod openai;

/// Author of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message of a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Provider-neutral completion request
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompletionRequest {
    pub model: String,
    pub system: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn add_message(mut self, message: ChatMessage) -> Self {
        self.messages.push(message);
        self
    }

    /// Content of the most recent user message
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}

/// Provider-neutral completion response
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompletionResponse {
    pub text: String,
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
}

/// Common trait for all LLM providers
///
/// Implementations map their transport and HTTP failures onto `ModelError`
/// so the optimizer can decide between retrying and falling back.
#[async_trait]
pub trait Provider: Send + Sync + Debug {
    /// Short identifier used in logs
    fn name(&self) -> &str;

    /// Complete a request using this provider
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, ModelError>;
}

/// Map an unsuccessful HTTP status to a model error category
pub fn classify_status(status: reqwest::StatusCode, body: &str) -> ModelError {
    let message = format!("{} - {}", status, body.chars().take(500).collect::<String>());
    match status.as_u16() {
        401 | 403 => ModelError::Auth(message),
        429 => ModelError::RateLimited(message),
        408 => ModelError::TransientNetwork(message),
        s if s >= 500 => ModelError::TransientNetwork(message),
        _ => ModelError::InvalidResponse(message),
    }
}

/// Map a transport failure to a model error category
pub fn classify_transport(error: &reqwest::Error) -> ModelError {
    if error.is_decode() {
        ModelError::InvalidResponse(error.to_string())
    } else {
        ModelError::TransientNetwork(error.to_string())
    }
}

/// Finish a client builder, keeping its timeout or failing loudly
pub(crate) fn build_client(builder: reqwest::ClientBuilder) -> Result<reqwest::Client, ConfigError> {
    builder
        .build()
        .map_err(|e| ConfigError::Invalid(format!("Failed to build HTTP client: {}", e)))
}

/// Build the configured provider
pub fn create_provider(config: &Config) -> Result<Arc<dyn Provider>, ConfigError> {
    let model_timeout = config.get_timeout();
    let endpoint = config.get_endpoint();
    let provider: Arc<dyn Provider> = match config.provider {
        ProviderKind::OpenAI => Arc::new(openai::OpenAI::new(config.get_api_key(), endpoint, model_timeout)?),
        ProviderKind::Anthropic => Arc::new(anthropic::Anthropic::new(config.get_api_key(), endpoint, model_timeout)?),
        ProviderKind::Ollama => Arc::new(ollama::Ollama::from_url(&endpoint, model_timeout)?),
    };
    Ok(provider)
}
