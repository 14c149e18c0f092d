use async_trait::async_trait;
use log::error;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::{ConfigError, ModelError};
use crate::providers::{ChatMessage, CompletionRequest, CompletionResponse, Provider, Role, build_client, classify_status, classify_transport};

/// Ollama client for interacting with Ollama API
#[derive(Debug)]
pub struct Ollama {
    /// Base URL of the Ollama API
    base_url: String,
    /// HTTP client for making requests
    client: Client,
}

/// Generation options for the Ollama API
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct GenerationOptions {
    /// Temperature for generation (default: 0.8)
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    /// Maximum number of tokens to generate
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

/// Chat request for the Ollama API
#[derive(Debug, Serialize)]
pub struct ChatRequest {
    /// Model name to use for generation
    model: String,
    /// Messages of the conversation, system prompt first
    messages: Vec<ChatMessage>,
    /// Additional model parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<GenerationOptions>,
    /// Whether to stream the response
    stream: bool,
}

/// Chat response from the Ollama API
#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    /// Response message
    pub message: OllamaMessage,
    /// Number of prompt tokens
    #[serde(default)]
    pub prompt_eval_count: Option<u64>,
    /// Number of generated tokens
    #[serde(default)]
    pub eval_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct OllamaMessage {
    #[serde(default)]
    pub content: String,
}

impl ChatRequest {
    pub fn from_completion(request: &CompletionRequest) -> Self {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = &request.system {
            messages.push(ChatMessage {
                role: Role::System,
                content: system.clone(),
            });
        }
        messages.extend(request.messages.iter().cloned());
        let options = (request.temperature.is_some() || request.max_tokens.is_some()).then(|| GenerationOptions {
            temperature: request.temperature,
            num_predict: request.max_tokens,
        });
        Self {
            model: request.model.clone(),
            messages,
            options,
            stream: false,
        }
    }
}

impl Ollama {
    /// Create a new Ollama client from a complete URL such as `http://localhost:11434`
    pub fn from_url(url: &str, timeout: Duration) -> Result<Self, ConfigError> {
        let parsed = url::Url::parse(url)
            .map_err(|e| ConfigError::Invalid(format!("Invalid Ollama endpoint '{}': {}", url, e)))?;
        // Ollama uses HTTP/1.1
        let builder = Client::builder()
            .timeout(timeout)
            .http1_only()
            .pool_idle_timeout(Duration::from_secs(90));
        Ok(Self {
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
            client: build_client(builder)?,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Provider for Ollama {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, ModelError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = ChatRequest::from_completion(request);

        let response = self
            .client
            .post(&url)
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
            error!("Ollama API error ({}): {}", status, error_text);
            return Err(classify_status(status, &error_text));
        }

        let response_text = response
            .text()
            .await
            .map_err(|e| ModelError::TransientNetwork(format!("Failed to read Ollama response: {}", e)))?;
        let parsed = parse_chat_response(&response_text)?;

        Ok(CompletionResponse {
            text: parsed.message.content,
            prompt_tokens: parsed.prompt_eval_count,
            completion_tokens: parsed.eval_count,
        })
    }
}

/// Parse a chat response, tolerating servers that stream JSONL even when asked not to
fn parse_chat_response(response_text: &str) -> Result<ChatResponse, ModelError> {
    if let Ok(parsed) = serde_json::from_str::<ChatResponse>(response_text) {
        return Ok(parsed);
    }

    let mut content = String::new();
    let mut prompt_eval_count = None;
    let mut eval_count = None;
    let mut any = false;
    for line in response_text.lines().filter(|l| !l.trim().is_empty()) {
        if let Ok(part) = serde_json::from_str::<ChatResponse>(line) {
            any = true;
            content.push_str(&part.message.content);
            prompt_eval_count = part.prompt_eval_count.or(prompt_eval_count);
            eval_count = part.eval_count.or(eval_count);
        }
    }
    if !any {
        let preview: String = response_text.chars().take(500).collect();
        error!("Failed to parse Ollama API chat response. Raw response (first 500 chars): {}", preview);
        return Err(ModelError::InvalidResponse("unparseable Ollama chat response".to_string()));
    }
    Ok(ChatResponse {
        message: OllamaMessage { content },
        prompt_eval_count,
        eval_count,
    })
}
