use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::app_config::normalize_openai_endpoint;
use crate::errors::{ConfigError, ModelError};
use crate::providers::{ChatMessage, CompletionRequest, CompletionResponse, Provider, Role, build_client, classify_status, classify_transport};

/// Client for OpenAI-compatible chat completion APIs
#[derive(Debug)]
pub struct OpenAI {
    /// HTTP client for API requests
    client: Client,
    /// API key for bearer authentication
    api_key: String,
    /// Base URL ending in the API version, e.g. `https://api.openai.com/v1`
    endpoint: String,
}

/// Chat completions request body
#[derive(Debug, Serialize)]
pub struct OpenAIRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

/// Token usage information
#[derive(Debug, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
pub struct OpenAIChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OpenAIChoice {
    pub message: OpenAIChoiceMessage,
}

/// Chat completions response body
#[derive(Debug, Deserialize)]
pub struct OpenAIResponse {
    pub choices: Vec<OpenAIChoice>,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
}

impl OpenAIRequest {
    /// Flatten a neutral request, the system prompt becoming the first message
    pub fn from_completion(request: &CompletionRequest) -> Self {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = &request.system {
            messages.push(ChatMessage {
                role: Role::System,
                content: system.clone(),
            });
        }
        messages.extend(request.messages.iter().cloned());
        Self {
            model: request.model.clone(),
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        }
    }
}

impl OpenAI {
    /// Create a new client; the endpoint gets a `/v1` suffix when it has no path
    pub fn new(api_key: impl Into<String>, endpoint: impl AsRef<str>, timeout: Duration) -> Result<Self, ConfigError> {
        Ok(Self {
            client: build_client(Client::builder().timeout(timeout))?,
            api_key: api_key.into(),
            endpoint: normalize_openai_endpoint(endpoint.as_ref()),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Extract text from the first choice
    pub fn extract_text_from_response(response: &OpenAIResponse) -> Option<String> {
        response.choices.first()?.message.content.clone()
    }
}

#[async_trait]
impl Provider for OpenAI {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, ModelError> {
        let api_url = format!("{}/chat/completions", self.endpoint);
        let body = OpenAIRequest::from_completion(request);

        let mut builder = self.client.post(&api_url).json(&body);
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }
        let response = builder.send().await.map_err(|e| classify_transport(&e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to get error response text".to_string());
            error!("OpenAI API error ({}): {}", status, error_text);
            return Err(classify_status(status, &error_text));
        }

        let parsed = response
            .json::<OpenAIResponse>()
            .await
            .map_err(|e| ModelError::InvalidResponse(format!("Failed to parse OpenAI API response: {}", e)))?;
        let text = Self::extract_text_from_response(&parsed)
            .ok_or_else(|| ModelError::InvalidResponse("response has no message content".to_string()))?;
        debug!("OpenAI completion: {} chars", text.len());

        Ok(CompletionResponse {
            text,
            prompt_tokens: parsed.usage.as_ref().map(|u| u.prompt_tokens),
            completion_tokens: parsed.usage.as_ref().map(|u| u.completion_tokens),
        })
    }
}
