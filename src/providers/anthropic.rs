use std::time::Duration;

use async_trait::async_trait;
use log::error;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::errors::{ConfigError, ModelError};
use crate::providers::{CompletionRequest, CompletionResponse, Provider, Role, build_client, classify_status, classify_transport};

/// Default output budget; the messages API requires one
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic client for interacting with Anthropic API
#[derive(Debug)]
pub struct Anthropic {
    /// HTTP client for API requests
    client: Client,
    /// API key for authentication
    api_key: String,
    /// API endpoint URL (optional, defaults to public API)
    endpoint: String,
}

/// Anthropic message request
#[derive(Debug, Serialize)]
pub struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    max_tokens: u32,
}

/// Anthropic message format
#[derive(Debug, Serialize, Deserialize)]
pub struct AnthropicMessage {
    /// Role of the message sender (user, assistant)
    pub role: String,
    /// Content of the message
    pub content: String,
}

/// Token usage information
#[derive(Debug, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Anthropic response
#[derive(Debug, Deserialize)]
pub struct AnthropicResponse {
    pub content: Vec<AnthropicContent>,
    pub usage: TokenUsage,
}

/// Individual content block in an Anthropic response
#[derive(Debug, Deserialize)]
pub struct AnthropicContent {
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default)]
    pub text: String,
}

impl AnthropicRequest {
    /// System messages move to the top-level `system` field
    pub fn from_completion(request: &CompletionRequest) -> Self {
        let messages = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| AnthropicMessage {
                role: match m.role {
                    Role::Assistant => "assistant".to_string(),
                    _ => "user".to_string(),
                },
                content: m.content.clone(),
            })
            .collect();
        Self {
            model: request.model.clone(),
            messages,
            system: request.system.clone(),
            temperature: request.temperature,
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        }
    }
}

impl Anthropic {
    /// Create a new Anthropic client
    pub fn new(api_key: impl Into<String>, endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ConfigError> {
        Ok(Self {
            client: build_client(Client::builder().timeout(timeout))?,
            api_key: api_key.into(),
            endpoint: endpoint.into(),
        })
    }

    fn api_url(&self) -> String {
        if self.endpoint.is_empty() {
            "https://api.anthropic.com/v1/messages".to_string()
        } else {
            format!("{}/v1/messages", self.endpoint.trim_end_matches('/'))
        }
    }

    /// Extract text from Anthropic response
    pub fn extract_text_from_response(response: &AnthropicResponse) -> String {
        response
            .content
            .iter()
            .filter(|c| c.content_type == "text")
            .map(|c| c.text.as_str())
            .collect()
    }
}

#[async_trait]
impl Provider for Anthropic {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, ModelError> {
        let body = AnthropicRequest::from_completion(request);
        let response = self
            .client
            .post(self.api_url())
            .header("Content-Type", "application/json")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to get error response text".to_string());
            error!("Anthropic API error ({}): {}", status, error_text);
            // 529 is Anthropic's "overloaded"
            return Err(classify_status(status, &error_text));
        }

        let parsed = response
            .json::<AnthropicResponse>()
            .await
            .map_err(|e| ModelError::InvalidResponse(format!("Failed to parse Anthropic API response: {}", e)))?;

        Ok(CompletionResponse {
            text: Self::extract_text_from_response(&parsed),
            prompt_tokens: Some(parsed.usage.input_tokens),
            completion_tokens: Some(parsed.usage.output_tokens),
        })
    }
}
