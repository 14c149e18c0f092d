/*!
 * End-to-end pipeline runs with a fake ASR engine and mock model
 */

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use videoscribe::app_config::Config;
use videoscribe::cancel::CancellationToken;
use videoscribe::errors::{AppError, DownloadError};
use videoscribe::optimizer::OptimizationStatus;
use videoscribe::pipeline::{Pipeline, PipelineRequest};
use videoscribe::providers::mock::MockProvider;
use videoscribe::subtitle::SubtitleDocument;

use crate::common;
use crate::common::fakes::{pythagoras_corrector, FakeRecognizer};

fn pipeline(config: Config, recognizer: FakeRecognizer, provider: MockProvider) -> Pipeline {
    Pipeline::new(config)
        .unwrap()
        .with_recognizer(Arc::new(recognizer))
        .with_provider(Arc::new(provider))
}

fn corrector() -> MockProvider {
    MockProvider::echo().with_custom_response(pythagoras_corrector)
}

fn fake_video(dir: &Path, name: &str) -> String {
    common::create_test_file(dir, name, "not really a video")
        .unwrap()
        .to_string_lossy()
        .into_owned()
}

#[tokio::test]
async fn test_run_withContext_shouldFixTermsAndKeepTimestamps() {
    common::init_logger();
    let dir = common::create_temp_dir().unwrap();
    let source = fake_video(dir.path(), "talk.mp4");
    let output = dir.path().join("talk.srt");
    let pipeline = pipeline(
        common::test_config(dir.path()),
        FakeRecognizer::new(common::pythagoras_document()),
        corrector(),
    );

    let request = PipelineRequest::new(&source, &output).with_context(common::PYTHAGORAS_CONTEXT);
    let report = pipeline.run(&request, &CancellationToken::new()).await.unwrap();

    let written = SubtitleDocument::parse_srt(&std::fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(written, report.document.clone().with_context(None).with_language(None));
    assert_eq!(written.len(), 3);
    for (original, corrected) in common::pythagoras_document().segments().iter().zip(written.segments()) {
        assert_eq!((original.start_ms, original.end_ms), (corrected.start_ms, corrected.end_ms));
    }
    assert_eq!(written.segments()[0].text, "Hello world.");
    assert!(written.segments()[2].text.contains("Pythagorean theorem"));
    assert_eq!(report.fallback_count(), 0);
    assert_eq!(report.document.language(), Some("en"));
}

#[tokio::test]
async fn test_run_withoutContext_shouldLeaveAmbiguousTermAlone() {
    let dir = common::create_temp_dir().unwrap();
    let source = fake_video(dir.path(), "talk.mp4");
    let output = dir.path().join("talk.srt");
    let pipeline = pipeline(
        common::test_config(dir.path()),
        FakeRecognizer::new(common::pythagoras_document()),
        corrector(),
    );

    let report = pipeline
        .run(&PipelineRequest::new(&source, &output), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.document.segments()[2].text, "pythagoras therom");
    assert_eq!(report.document.segments()[1].text, "It's fine.");
}

#[tokio::test]
async fn test_run_withJsonOutput_shouldWriteJson() {
    let dir = common::create_temp_dir().unwrap();
    let source = fake_video(dir.path(), "talk.mp4");
    let output = dir.path().join("talk.json");
    let pipeline = pipeline(
        common::test_config(dir.path()),
        FakeRecognizer::new(common::pythagoras_document()),
        MockProvider::echo(),
    );

    pipeline
        .run(&PipelineRequest::new(&source, &output), &CancellationToken::new())
        .await
        .unwrap();

    let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(value["3"]["text"], "pythagoras therom");
    assert_eq!(value["3"]["end_time"], 6000);
}

#[tokio::test]
async fn test_run_whenCancelledDuringTranscription_shouldWriteNothing() {
    let dir = common::create_temp_dir().unwrap();
    let source = fake_video(dir.path(), "talk.mp4");
    let output = dir.path().join("talk.srt");
    let provider = MockProvider::echo();
    let pipeline = pipeline(
        common::test_config(dir.path()),
        FakeRecognizer::new(common::pythagoras_document()).with_delay(Duration::from_secs(30)),
        provider.clone(),
    );

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        pipeline.run(&PipelineRequest::new(&source, &output), &cancel),
    )
    .await
    .expect("cancellation should stop the run promptly");

    assert!(matches!(result, Err(AppError::Cancelled)));
    assert_eq!(result.unwrap_err().exit_code(), 8);
    assert!(!output.exists());
    assert_eq!(provider.request_count(), 0);
}

#[tokio::test]
async fn test_run_withMissingSource_shouldBeDownloadError() {
    let dir = common::create_temp_dir().unwrap();
    let pipeline = pipeline(
        common::test_config(dir.path()),
        FakeRecognizer::new(common::pythagoras_document()),
        MockProvider::echo(),
    );

    let request = PipelineRequest::new(dir.path().join("nope.mp4").to_string_lossy(), dir.path().join("o.srt"));
    let result = pipeline.run(&request, &CancellationToken::new()).await;

    assert!(matches!(result, Err(AppError::Download(DownloadError::UnsupportedSource(_)))));
}

#[tokio::test]
async fn test_run_withSubtitleSource_shouldPointToOptimize() {
    let dir = common::create_temp_dir().unwrap();
    let source = common::create_test_subtitle(dir.path(), "lecture.srt").unwrap();
    let pipeline = pipeline(
        common::test_config(dir.path()),
        FakeRecognizer::new(common::pythagoras_document()),
        MockProvider::echo(),
    );

    let request = PipelineRequest::new(source.to_string_lossy(), dir.path().join("o.srt"));
    match pipeline.run(&request, &CancellationToken::new()).await {
        Err(AppError::Download(DownloadError::UnsupportedSource(message))) => {
            assert!(message.contains("optimize"), "{}", message)
        }
        other => panic!("expected unsupported source, got {:?}", other.map(|r| r.output_path)),
    }
}

#[tokio::test]
async fn test_transcribeOnly_shouldSkipTheModel() {
    let dir = common::create_temp_dir().unwrap();
    let source = fake_video(dir.path(), "talk.wav");
    let output = dir.path().join("talk.txt");
    let provider = MockProvider::echo();
    let pipeline = pipeline(
        common::test_config(dir.path()),
        FakeRecognizer::new(common::pythagoras_document()),
        provider.clone(),
    );

    let report = pipeline
        .transcribe_only(&PipelineRequest::new(&source, &output), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(provider.request_count(), 0);
    assert!(report.chunk_statuses.is_empty());
    assert_eq!(
        std::fs::read_to_string(&output).unwrap().lines().collect::<Vec<_>>(),
        vec!["helo wrld", "um its fine", "pythagoras therom"]
    );
}

#[tokio::test]
async fn test_run_withOptimizationDisabled_shouldKeepRawTranscript() {
    let dir = common::create_temp_dir().unwrap();
    let source = fake_video(dir.path(), "talk.mp4");
    let output = dir.path().join("talk.srt");
    let mut config = common::test_config(dir.path());
    config.optimize.enabled = false;
    let provider = MockProvider::malformed();
    let pipeline = pipeline(config, FakeRecognizer::new(common::pythagoras_document()), provider.clone());

    let report = pipeline
        .run(&PipelineRequest::new(&source, &output), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.document.segments(), common::pythagoras_document().segments());
    assert_eq!(provider.request_count(), 0);
}

#[tokio::test]
async fn test_run_withUnusableModel_shouldStillWriteOriginalText() {
    let dir = common::create_temp_dir().unwrap();
    let source = fake_video(dir.path(), "talk.mp4");
    let output = dir.path().join("talk.srt");
    let pipeline = pipeline(
        common::test_config(dir.path()),
        FakeRecognizer::new(common::pythagoras_document()),
        MockProvider::malformed(),
    );

    let report = pipeline
        .run(&PipelineRequest::new(&source, &output), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.fallback_count(), 1);
    assert_eq!(report.chunk_statuses[0].status, OptimizationStatus::FallbackToOriginal);
    assert_eq!(report.chunk_statuses[0].attempts, 3);
    let written = SubtitleDocument::parse_srt(&std::fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(written.segments(), common::pythagoras_document().segments());
}

#[tokio::test]
async fn test_optimizeFile_shouldCorrectExistingSubtitles() {
    let dir = common::create_temp_dir().unwrap();
    let input = common::create_test_file(dir.path(), "lecture.srt", &common::pythagoras_document().to_srt()).unwrap();
    let output = dir.path().join("lecture_optimized.srt");
    let pipeline = pipeline(
        common::test_config(dir.path()),
        FakeRecognizer::new(SubtitleDocument::default()),
        corrector(),
    );

    let report = pipeline
        .optimize_file(
            &input,
            &output,
            Some(common::PYTHAGORAS_CONTEXT.to_string()),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.output_path, output);
    assert_eq!(report.document.segments()[2].text, "Pythagorean theorem.");
    assert!(output.is_file());
}

#[tokio::test]
async fn test_optimizeFile_withBrokenInput_shouldBeFormatError() {
    let dir = common::create_temp_dir().unwrap();
    let input = common::create_test_file(dir.path(), "broken.srt", "1\nnot a timecode\ntext\n").unwrap();
    let pipeline = pipeline(
        common::test_config(dir.path()),
        FakeRecognizer::new(SubtitleDocument::default()),
        MockProvider::echo(),
    );

    let result = pipeline
        .optimize_file(&input, &dir.path().join("out.srt"), None, &CancellationToken::new())
        .await;

    match result {
        Err(e @ AppError::Format(_)) => assert_eq!(e.exit_code(), 6),
        other => panic!("expected format error, got {:?}", other.map(|r| r.output_path)),
    }
}

#[tokio::test]
async fn test_runBatch_withOneFailingInput_shouldContinue() {
    let dir = common::create_temp_dir().unwrap();
    let inputs = dir.path().join("inputs");
    let outputs = dir.path().join("outputs");
    std::fs::create_dir_all(&inputs).unwrap();
    fake_video(&inputs, "a_intro.mp4");
    fake_video(&inputs, "b_broken.mp4");
    fake_video(&inputs, "c_outro.mkv");
    common::create_test_file(&inputs, "notes.txt", "ignored").unwrap();

    let recognizer = FakeRecognizer::new(common::pythagoras_document()).failing_on("broken");
    let pipeline = pipeline(common::test_config(dir.path()), recognizer, MockProvider::echo());

    let report = pipeline
        .run_batch(&inputs, &outputs, "srt", None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.completed.len(), 2);
    assert_eq!(report.failed.len(), 1);
    assert!(report.failed[0].0.ends_with("b_broken.mp4"));
    assert!(outputs.join("a_intro.srt").is_file());
    assert!(outputs.join("c_outro.srt").is_file());
    assert!(!outputs.join("b_broken.srt").exists());
}
