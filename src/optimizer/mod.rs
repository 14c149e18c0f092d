/*!
 * Language model correction of transcript chunks.
 *
 * Each chunk is sent as a numbered JSON object and every reply must map the
 * same numbers to corrected text, so alignment is a key lookup and the
 * original timestamps are never touched. A chunk whose replies cannot be
 * used keeps its original text; one bad chunk never fails the document.
 */

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::Semaphore;

use crate::app_config::Config;
use crate::cancel::CancellationToken;
use crate::chunker::Chunk;
use crate::errors::ModelError;
use crate::providers::{ChatMessage, CompletionRequest, Provider};
use crate::retry::RetryPolicy;
use crate::subtitle::SubtitleDocument;

use self::response::ReplyError;

pub mod prompts;
pub mod response;
pub mod similarity;

/// Outcome category for one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationStatus {
    /// Reply parsed strictly and passed validation
    Ok,
    /// Reply needed lenient parsing but passed validation
    Repaired,
    /// No usable reply; original text kept
    FallbackToOriginal,
}

/// Corrected text for every segment of one chunk
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizationResult {
    pub chunk_index: usize,
    /// Document position of the chunk's first segment
    pub first_segment: usize,
    /// One string per segment, in segment order
    pub texts: Vec<String>,
    pub status: OptimizationStatus,
    /// Model calls made for this chunk
    pub attempts: u32,
    /// Last problem seen, kept for fallbacks and repaired results
    pub error: Option<String>,
}

impl OptimizationResult {
    /// Result carrying the chunk's own text unchanged
    pub fn fallback(chunk: &Chunk, attempts: u32, error: Option<String>) -> Self {
        Self {
            chunk_index: chunk.index,
            first_segment: chunk.first_segment,
            texts: chunk.texts(),
            status: OptimizationStatus::FallbackToOriginal,
            attempts,
            error,
        }
    }
}

/// Model and retry knobs for the optimizer
#[derive(Debug, Clone)]
pub struct OptimizerSettings {
    pub model: String,
    pub system_prompt: String,
    pub temperature: f32,
    pub retry: RetryPolicy,
    pub concurrency: usize,
    pub similarity_guard: bool,
}

impl OptimizerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.get_model(),
            system_prompt: config.optimize.system_prompt.clone(),
            temperature: config.optimize.temperature,
            retry: config.optimize.retry_policy(),
            concurrency: config.optimize.concurrency.max(1),
            similarity_guard: config.optimize.similarity_guard,
        }
    }
}

/// Sends chunks to a provider and validates the replies
#[derive(Debug, Clone)]
pub struct Optimizer {
    provider: Arc<dyn Provider>,
    settings: OptimizerSettings,
}

impl Optimizer {
    pub fn new(provider: Arc<dyn Provider>, settings: OptimizerSettings) -> Self {
        Self { provider, settings }
    }

    pub fn settings(&self) -> &OptimizerSettings {
        &self.settings
    }

    /// Correct one chunk.
    ///
    /// Only cancellation is an error; every other failure ends in a
    /// `FallbackToOriginal` result.
    pub async fn optimize(
        &self,
        chunk: &Chunk,
        context: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<OptimizationResult, ModelError> {
        let expected = prompts::expected_keys(chunk);
        let originals = chunk.texts();
        let mut messages = vec![ChatMessage::user(prompts::build_user_prompt(chunk, context))];
        let mut last_error: Option<String> = None;
        let max_attempts = self.settings.retry.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return Err(ModelError::Cancelled);
            }

            let request = CompletionRequest {
                model: self.settings.model.clone(),
                system: Some(self.settings.system_prompt.clone()),
                messages: messages.clone(),
                temperature: Some(self.settings.temperature),
                max_tokens: None,
            };

            let outcome = tokio::select! {
                outcome = self.provider.complete(&request) => outcome,
                _ = cancel.cancelled() => return Err(ModelError::Cancelled),
            };

            match outcome {
                Ok(reply) => match self.validate_reply(&reply.text, &expected, &originals) {
                    Ok((texts, repaired)) => {
                        let status = if repaired {
                            OptimizationStatus::Repaired
                        } else {
                            OptimizationStatus::Ok
                        };
                        debug!("Chunk {} optimized ({:?}) after {} attempt(s)", chunk.index, status, attempt);
                        return Ok(OptimizationResult {
                            chunk_index: chunk.index,
                            first_segment: chunk.first_segment,
                            texts,
                            status,
                            attempts: attempt,
                            error: last_error,
                        });
                    }
                    Err(problem) => {
                        warn!(
                            "Chunk {} reply rejected (attempt {}/{}): {}",
                            chunk.index, attempt, max_attempts, problem
                        );
                        messages.push(ChatMessage::assistant(reply.text));
                        messages.push(ChatMessage::user(prompts::build_feedback_prompt(&problem, &expected)));
                        last_error = Some(problem);
                    }
                },
                Err(ModelError::Cancelled) => return Err(ModelError::Cancelled),
                Err(e @ ModelError::Auth(_)) => {
                    warn!("Chunk {} cannot be optimized: {}", chunk.index, e);
                    return Ok(OptimizationResult::fallback(chunk, attempt, Some(e.to_string())));
                }
                Err(e) => {
                    warn!(
                        "Chunk {} model call failed (attempt {}/{}): {}",
                        chunk.index, attempt, max_attempts, e
                    );
                    let transient = e.is_transient();
                    last_error = Some(e.to_string());
                    if transient && attempt < max_attempts {
                        let delay = self.settings.retry.delay_for(attempt);
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = cancel.cancelled() => return Err(ModelError::Cancelled),
                        }
                    }
                }
            }
        }

        warn!(
            "Chunk {} falling back to original text after {} attempts",
            chunk.index, max_attempts
        );
        Ok(OptimizationResult::fallback(chunk, max_attempts, last_error))
    }

    /// Correct all chunks with at most `concurrency` model calls in flight.
    ///
    /// Results come back ordered by chunk index regardless of completion
    /// order. Cancellation discards everything collected so far.
    pub async fn optimize_all(
        &self,
        chunks: &[Chunk],
        context: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Vec<OptimizationResult>, ModelError> {
        let concurrency = self.settings.concurrency.max(1);
        let semaphore = Arc::new(Semaphore::new(concurrency));
        info!("Optimizing {} chunks with up to {} concurrent requests", chunks.len(), concurrency);

        let results = stream::iter(chunks.iter())
            .map(|chunk| {
                let semaphore = Arc::clone(&semaphore);
                async move {
                    let _permit = semaphore.acquire().await.map_err(|_| ModelError::Cancelled)?;
                    self.optimize(chunk, context, cancel).await
                }
            })
            .buffer_unordered(concurrency)
            .collect::<Vec<_>>()
            .await;

        let mut ordered = Vec::with_capacity(results.len());
        for result in results {
            ordered.push(result?);
        }
        ordered.sort_by_key(|r| r.chunk_index);

        let fallbacks = ordered
            .iter()
            .filter(|r| r.status == OptimizationStatus::FallbackToOriginal)
            .count();
        if fallbacks > 0 {
            warn!("{} of {} chunks kept their original text", fallbacks, ordered.len());
        }
        Ok(ordered)
    }

    /// Check a reply against the chunk; returns texts in segment order and
    /// whether lenient parsing was needed
    fn validate_reply(
        &self,
        text: &str,
        expected: &[usize],
        originals: &[String],
    ) -> Result<(Vec<String>, bool), String> {
        let parsed = response::parse_reply(text).map_err(|error| match error {
            ReplyError::Unparseable => "reply is not a JSON object mapping line numbers to text".to_string(),
            ReplyError::DuplicateKeys(keys) => {
                format!("keys {:?} appear more than once; return exactly one entry per line", keys)
            }
        })?;
        let repaired = parsed.is_repaired();
        let corrections = parsed.corrections();

        let expected_set: BTreeSet<usize> = expected.iter().copied().collect();
        let returned: BTreeSet<usize> = corrections.keys().copied().collect();
        if expected_set != returned {
            let missing: Vec<usize> = expected_set.difference(&returned).copied().collect();
            let unexpected: Vec<usize> = returned.difference(&expected_set).copied().collect();
            return Err(format!(
                "expected {} entries, got {} (missing keys {:?}, unexpected keys {:?})",
                expected.len(),
                corrections.len(),
                missing,
                unexpected
            ));
        }

        let texts: Vec<String> = expected
            .iter()
            .filter_map(|key| corrections.get(key).cloned())
            .collect();

        let empty: Vec<usize> = expected
            .iter()
            .zip(&texts)
            .filter(|(_, t)| t.trim().is_empty())
            .map(|(k, _)| *k)
            .collect();
        if !empty.is_empty() {
            return Err(format!("empty text for keys {:?}", empty));
        }

        if self.settings.similarity_guard {
            let drifted: Vec<usize> = expected
                .iter()
                .zip(originals.iter().zip(&texts))
                .filter(|(_, (original, corrected))| !similarity::is_acceptable(original, corrected))
                .map(|(k, _)| *k)
                .collect();
            if !drifted.is_empty() {
                return Err(format!(
                    "lines {:?} differ too much from the original; correct them, do not rewrite them",
                    drifted
                ));
            }
        }

        Ok((texts, repaired))
    }
}

/// Substitute corrected texts into copies of the original segments.
///
/// Results are applied by chunk index, never arrival order. Timestamps and
/// segment count come from `document` unchanged; an empty correction keeps
/// the original text. Blank lines inside a correction are dropped.
pub fn merge(document: &SubtitleDocument, results: &[OptimizationResult]) -> SubtitleDocument {
    let mut segments = document.segments().to_vec();
    let mut ordered: Vec<&OptimizationResult> = results.iter().collect();
    ordered.sort_by_key(|r| r.chunk_index);

    for result in ordered {
        for (offset, text) in result.texts.iter().enumerate() {
            let position = result.first_segment + offset;
            let Some(segment) = segments.get_mut(position) else {
                warn!("Chunk {} refers to segment {} beyond the document", result.chunk_index, position + 1);
                break;
            };
            let replaced = segment.with_text(text);
            if !replaced.text.is_empty() {
                *segment = replaced;
            }
        }
    }

    document.with_segments(segments)
}
