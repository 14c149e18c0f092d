/*!
 * Mock provider implementations for testing.
 *
 * This module provides a mock provider that simulates different behaviors:
 * - `MockProvider::echo()` - Always returns the input lines unchanged as JSON
 * - `MockProvider::malformed()` - Always returns prose that is not JSON
 * - `MockProvider::failing(e)` - Always fails with the given error
 * - `MockProvider::scripted(..)` - Plays back a list of replies, then echoes
 *
 * Every clone shares its counters, so tests can read how many requests were
 * made and how many were in flight at once.
 */

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::errors::ModelError;
use crate::optimizer::prompts;
use crate::providers::{CompletionRequest, CompletionResponse, Provider};

/// Behavior mode for the mock provider
#[derive(Debug, Clone, PartialEq)]
pub enum MockBehavior {
    /// Reply with the request's input lines unchanged
    Echo,
    /// Reply with text that no parser accepts
    Malformed,
    /// Always fail with this error
    Failing(ModelError),
}

#[derive(Debug, Default)]
struct Counters {
    requests: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a Counters);

impl<'a> InFlight<'a> {
    fn enter(counters: &'a Counters) -> Self {
        let now = counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        counters.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(counters)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Mock provider for testing optimizer behavior
#[derive(Debug, Clone)]
pub struct MockProvider {
    /// Behavior mode once the script is exhausted
    behavior: MockBehavior,
    /// Replies played back first, one per request
    script: Arc<Mutex<VecDeque<Result<String, ModelError>>>>,
    /// Shared request counters
    counters: Arc<Counters>,
    /// Simulated latency per request
    delay: Option<Duration>,
    /// Custom response generator (optional)
    custom_response: Option<fn(&CompletionRequest) -> String>,
}

impl MockProvider {
    /// Create a new mock provider with the specified behavior
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            script: Arc::new(Mutex::new(VecDeque::new())),
            counters: Arc::new(Counters::default()),
            delay: None,
            custom_response: None,
        }
    }

    pub fn echo() -> Self {
        Self::new(MockBehavior::Echo)
    }

    pub fn malformed() -> Self {
        Self::new(MockBehavior::Malformed)
    }

    pub fn failing(error: ModelError) -> Self {
        Self::new(MockBehavior::Failing(error))
    }

    /// Play back `replies` in order, then echo
    pub fn scripted(replies: Vec<Result<String, ModelError>>) -> Self {
        let provider = Self::echo();
        provider.script.lock().extend(replies);
        provider
    }

    /// Sleep this long inside every request
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Set a custom response generator
    pub fn with_custom_response(mut self, generator: fn(&CompletionRequest) -> String) -> Self {
        self.custom_response = Some(generator);
        self
    }

    pub fn request_count(&self) -> usize {
        self.counters.requests.load(Ordering::SeqCst)
    }

    /// Highest number of requests that were running at the same time
    pub fn max_in_flight(&self) -> usize {
        self.counters.max_in_flight.load(Ordering::SeqCst)
    }

    /// The input lines of the original prompt serialized back as JSON
    pub fn echo_reply(request: &CompletionRequest) -> String {
        let lines = request
            .messages
            .first()
            .and_then(|m| prompts::extract_input_lines(&m.content))
            .unwrap_or_default();
        let entries: Vec<String> = lines
            .iter()
            .map(|(k, v)| format!("\"{}\": {}", k, serde_json::Value::String(v.clone())))
            .collect();
        format!("{{{}}}", entries.join(", "))
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, ModelError> {
        self.counters.requests.fetch_add(1, Ordering::SeqCst);
        let _in_flight = InFlight::enter(&self.counters);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.script.lock().pop_front();
        let text = match scripted {
            Some(reply) => reply?,
            None => match (&self.behavior, self.custom_response) {
                (MockBehavior::Failing(error), _) => return Err(error.clone()),
                (_, Some(generator)) => generator(request),
                (MockBehavior::Echo, None) => Self::echo_reply(request),
                (MockBehavior::Malformed, None) => "Sorry, I could not process these subtitles.".to_string(),
            },
        };

        Ok(CompletionResponse {
            prompt_tokens: Some(request.messages.iter().map(|m| m.content.len() as u64).sum()),
            completion_tokens: Some(text.len() as u64 / 4),
            text,
        })
    }
}
