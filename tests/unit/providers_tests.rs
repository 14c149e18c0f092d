/*!
 * Tests for provider construction and error classification
 */

use std::time::{Duration, Instant};

use reqwest::StatusCode;

use videoscribe::app_config::ProviderKind;
use videoscribe::errors::ModelError;
use videoscribe::providers::openai::OpenAI;
use videoscribe::providers::{classify_status, create_provider, ChatMessage, CompletionRequest, Provider};

use crate::common;

#[test]
fn test_classifyStatus_shouldMapEachCategory() {
    let cases = [
        (StatusCode::UNAUTHORIZED, "auth"),
        (StatusCode::FORBIDDEN, "auth"),
        (StatusCode::TOO_MANY_REQUESTS, "rate"),
        (StatusCode::REQUEST_TIMEOUT, "transient"),
        (StatusCode::BAD_GATEWAY, "transient"),
        (StatusCode::SERVICE_UNAVAILABLE, "transient"),
        (StatusCode::BAD_REQUEST, "invalid"),
        (StatusCode::NOT_FOUND, "invalid"),
    ];
    for (status, expected) in cases {
        let category = match classify_status(status, "body") {
            ModelError::Auth(_) => "auth",
            ModelError::RateLimited(_) => "rate",
            ModelError::TransientNetwork(_) => "transient",
            ModelError::InvalidResponse(_) => "invalid",
            ModelError::Cancelled => "cancelled",
        };
        assert_eq!(category, expected, "status {}", status);
    }
}

#[test]
fn test_classifyStatus_shouldTruncateLongBodies() {
    let body = "x".repeat(5000);
    let ModelError::InvalidResponse(message) = classify_status(StatusCode::BAD_REQUEST, &body) else {
        panic!("expected invalid response");
    };
    assert!(message.len() < 600);
}

#[test]
fn test_createProvider_shouldFollowConfiguredKind() {
    let dir = common::create_temp_dir().unwrap();
    for (kind, name) in [
        (ProviderKind::OpenAI, "openai"),
        (ProviderKind::Anthropic, "anthropic"),
        (ProviderKind::Ollama, "ollama"),
    ] {
        let mut config = common::test_config(dir.path());
        config.provider = kind;
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.name(), name);
    }
}

#[test]
fn test_createProvider_withBadOllamaUrl_shouldFail() {
    let dir = common::create_temp_dir().unwrap();
    let mut config = common::test_config(dir.path());
    config.provider = ProviderKind::Ollama;
    config.active_provider_config_mut().endpoint = "not a url".to_string();
    assert!(create_provider(&config).is_err());
}

#[test]
fn test_lastUserMessage_shouldSkipAssistantTurns() {
    let request = CompletionRequest::new("m")
        .system("sys")
        .add_message(ChatMessage::user("first"))
        .add_message(ChatMessage::assistant("reply"))
        .add_message(ChatMessage::user("feedback"));
    assert_eq!(request.last_user_message(), Some("feedback"));
    assert_eq!(request.system.as_deref(), Some("sys"));
}

#[tokio::test]
async fn test_openAiClient_withSilentServer_shouldHonourTimeout() {
    // Accepts connections through the backlog but never answers
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let endpoint = format!("http://{}", listener.local_addr().unwrap());
    let client = OpenAI::new("key", &endpoint, Duration::from_millis(300)).unwrap();
    let request = CompletionRequest::new("m").add_message(ChatMessage::user("hi"));

    let started = Instant::now();
    let result = client.complete(&request).await;

    assert!(matches!(result, Err(ModelError::TransientNetwork(_))), "got {:?}", result);
    assert!(started.elapsed() < Duration::from_secs(10));
    drop(listener);
}
