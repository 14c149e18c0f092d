/*!
 * Tests for chunk optimization, retry and fallback
 */

use std::sync::Arc;

use videoscribe::cancel::CancellationToken;
use videoscribe::chunker::{self, UnitCost};
use videoscribe::errors::ModelError;
use videoscribe::optimizer::response::ReplyError;
use videoscribe::optimizer::{self, OptimizationResult, OptimizationStatus, Optimizer, OptimizerSettings, response, similarity};
use videoscribe::subtitle::SubtitleDocument;
use videoscribe::providers::mock::MockProvider;
use videoscribe::retry::RetryPolicy;

use crate::common;

fn settings() -> OptimizerSettings {
    OptimizerSettings {
        model: "mock-model".to_string(),
        system_prompt: "Correct the subtitles.".to_string(),
        temperature: 0.2,
        retry: RetryPolicy::immediate(3),
        concurrency: 2,
        similarity_guard: true,
    }
}

fn single_chunk() -> chunker::Chunk {
    chunker::split(&common::pythagoras_document(), 10_000, UnitCost::Chars).remove(0)
}

#[tokio::test]
async fn test_optimize_withEchoProvider_shouldBeOk() {
    let provider = MockProvider::echo();
    let optimizer = Optimizer::new(Arc::new(provider.clone()), settings());

    let result = optimizer
        .optimize(&single_chunk(), None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.status, OptimizationStatus::Ok);
    assert_eq!(result.attempts, 1);
    assert_eq!(result.texts, vec!["helo wrld", "um its fine", "pythagoras therom"]);
    assert_eq!(provider.request_count(), 1);
}

#[tokio::test]
async fn test_optimize_withRateLimitThenSuccess_shouldRetry() {
    let provider = MockProvider::scripted(vec![Err(ModelError::RateLimited("slow down".to_string()))]);
    let optimizer = Optimizer::new(Arc::new(provider.clone()), settings());

    let result = optimizer
        .optimize(&single_chunk(), None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.status, OptimizationStatus::Ok);
    assert_eq!(result.attempts, 2);
    assert!(result.error.unwrap().contains("Rate limit"));
    assert_eq!(provider.request_count(), 2);
}

#[tokio::test]
async fn test_optimize_withAuthError_shouldFallBackWithoutRetrying() {
    let provider = MockProvider::failing(ModelError::Auth("bad key".to_string()));
    let optimizer = Optimizer::new(Arc::new(provider.clone()), settings());
    let chunk = single_chunk();

    let result = optimizer.optimize(&chunk, None, &CancellationToken::new()).await.unwrap();

    assert_eq!(result.status, OptimizationStatus::FallbackToOriginal);
    assert_eq!(result.texts, chunk.texts());
    assert_eq!(provider.request_count(), 1);
}

#[tokio::test]
async fn test_optimize_withMalformedReplies_shouldFallBackAfterAllAttempts() {
    let provider = MockProvider::malformed();
    let optimizer = Optimizer::new(Arc::new(provider.clone()), settings());

    let result = optimizer
        .optimize(&single_chunk(), None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.status, OptimizationStatus::FallbackToOriginal);
    assert_eq!(result.attempts, 3);
    assert_eq!(provider.request_count(), 3);
    assert!(result.error.is_some());
}

#[tokio::test]
async fn test_optimize_withMissingKeyThenFix_shouldSucceedOnFeedback() {
    let provider = MockProvider::scripted(vec![Ok(r#"{"1": "Hello world.", "2": "It's fine."}"#.to_string())]);
    let optimizer = Optimizer::new(Arc::new(provider.clone()), settings());

    let result = optimizer
        .optimize(&single_chunk(), None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.status, OptimizationStatus::Ok);
    assert_eq!(result.attempts, 2);
    assert!(result.error.unwrap().contains("missing keys [3]"));
}

#[tokio::test]
async fn test_optimize_withFencedReply_shouldBeRepaired() {
    let reply = "```json\n{\"1\": \"Hello world.\", \"2\": \"It's fine.\", \"3\": \"pythagoras theorem\"}\n```";
    let provider = MockProvider::scripted(vec![Ok(reply.to_string())]);
    let optimizer = Optimizer::new(Arc::new(provider), settings());

    let result = optimizer
        .optimize(&single_chunk(), None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.status, OptimizationStatus::Repaired);
    assert_eq!(result.texts[0], "Hello world.");
}

#[tokio::test]
async fn test_optimize_withCancelledToken_shouldReturnCancelled() {
    let optimizer = Optimizer::new(Arc::new(MockProvider::echo()), settings());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = optimizer.optimize(&single_chunk(), None, &cancel).await;
    assert_eq!(result, Err(ModelError::Cancelled));
}

#[tokio::test]
async fn test_optimizeAll_shouldReturnResultsInChunkOrder() {
    let doc = common::numbered_document(20);
    let chunks = chunker::split(&doc, 30, UnitCost::Chars);
    assert!(chunks.len() > 3);
    let optimizer = Optimizer::new(Arc::new(MockProvider::echo()), settings());

    let results = optimizer
        .optimize_all(&chunks, None, &CancellationToken::new())
        .await
        .unwrap();

    let indices: Vec<usize> = results.iter().map(|r| r.chunk_index).collect();
    assert_eq!(indices, (0..chunks.len()).collect::<Vec<_>>());
    assert_eq!(optimizer::merge(&doc, &results), doc);
}

#[test]
fn test_merge_shouldApplyByChunkIndexAndKeepTimestamps() {
    let doc = common::numbered_document(4);
    let results = vec![
        OptimizationResult {
            chunk_index: 1,
            first_segment: 2,
            texts: vec!["Three.".to_string(), "Four.".to_string()],
            status: OptimizationStatus::Ok,
            attempts: 1,
            error: None,
        },
        OptimizationResult {
            chunk_index: 0,
            first_segment: 0,
            texts: vec!["One.".to_string(), "Two.".to_string()],
            status: OptimizationStatus::Repaired,
            attempts: 1,
            error: None,
        },
    ];

    let merged = optimizer::merge(&doc, &results);

    let texts: Vec<&str> = merged.segments().iter().map(|s| s.text.as_str()).collect();
    assert_eq!(texts, vec!["One.", "Two.", "Three.", "Four."]);
    for (before, after) in doc.segments().iter().zip(merged.segments()) {
        assert_eq!((before.start_ms, before.end_ms), (after.start_ms, after.end_ms));
    }
}

#[test]
fn test_parseReply_withTrailingCommentary_shouldRecoverObject() {
    let reply = response::parse_reply("Here are the fixes: {\"4\": \"Fixed.\"} Hope this helps.").unwrap();
    assert!(reply.is_repaired());
    assert_eq!(reply.corrections().get(&4).map(String::as_str), Some("Fixed."));
}

#[tokio::test]
async fn test_optimize_withEquivalentKeysThenFix_shouldRetryWithFeedback() {
    let reply = r#"{"1": "Hello world.", "01": "Hello world.", "2": "It's fine.", "3": "pythagoras therom"}"#;
    let provider = MockProvider::scripted(vec![Ok(reply.to_string())]);
    let optimizer = Optimizer::new(Arc::new(provider.clone()), settings());

    let result = optimizer
        .optimize(&single_chunk(), None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.status, OptimizationStatus::Ok);
    assert_eq!(result.attempts, 2);
    assert!(result.error.unwrap().contains("keys [1] appear more than once"));
    assert_eq!(provider.request_count(), 2);
}

#[test]
fn test_parseReply_withEquivalentKeys_shouldReportDuplicate() {
    assert_eq!(
        response::parse_reply(r#"{"1": "a", "01": "b"}"#),
        Err(ReplyError::DuplicateKeys(vec![1]))
    );
}

#[test]
fn test_parseReply_withRepeatedNumberedLine_shouldReportDuplicate() {
    assert_eq!(
        response::parse_reply("1: first\n2: second\n1: again"),
        Err(ReplyError::DuplicateKeys(vec![1]))
    );
}

#[test]
fn test_merge_withBlankLineInCorrection_shouldStillParseAsSrt() {
    let doc = common::numbered_document(2);
    let results = vec![OptimizationResult {
        chunk_index: 0,
        first_segment: 0,
        texts: vec!["Hello.\n\n  \nWorld.".to_string(), " Two. ".to_string()],
        status: OptimizationStatus::Ok,
        attempts: 1,
        error: None,
    }];

    let merged = optimizer::merge(&doc, &results);
    let reparsed = SubtitleDocument::parse_srt(&merged.to_srt()).unwrap();

    assert_eq!(merged.segments()[0].text, "Hello.\nWorld.");
    assert_eq!(merged.segments()[1].text, "Two.");
    assert_eq!(reparsed.segments(), merged.segments());
}

#[test]
fn test_thresholdFor_withLongChineseLine_shouldUseStrictThreshold() {
    let line = "今天我们来讨论一下毕达哥拉斯定理";
    assert_eq!(similarity::count_words(line), 16);
    assert_eq!(similarity::threshold_for(line), 0.7);
    assert_eq!(similarity::threshold_for("毕达哥拉斯定理"), 0.3);

    assert!(similarity::is_acceptable(line, "今天我们来讨论一下毕达哥拉斯定律"));
    assert!(!similarity::is_acceptable(line, "明天天气很好我们出去玩吧好不好"));
}
