use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::app_config::{AsrConfig, Device};
use crate::asr::{ProgressCallback, SpeechRecognizer};
use crate::cancel::CancellationToken;
use crate::errors::{ProcessError, TranscriptionError};
use crate::language_utils;
use crate::process_runner::{self, ProcessSpec};
use crate::subtitle::{self, SubtitleDocument};

/// The engine prepends this to `-m NAME` when it looks inside `--model_dir`
const MODEL_DIR_PREFIX: &str = "faster-whisper-";

static PROGRESS_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)%").unwrap());
static DETECTED_LANGUAGE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Detected language[:\s]+'?([A-Za-z]{2,3})'?").unwrap());

/// faster-whisper command line engine (Purfview's faster-whisper-xxl build)
#[derive(Clone)]
pub struct FasterWhisper {
    executable: PathBuf,
    /// Model name or absolute model directory
    model: String,
    vad_filter: bool,
    vad_threshold: f32,
    initial_prompt: Option<String>,
    timeout: Duration,
    progress: Option<ProgressCallback>,
}

impl std::fmt::Debug for FasterWhisper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FasterWhisper")
            .field("executable", &self.executable)
            .field("model", &self.model)
            .finish()
    }
}

impl FasterWhisper {
    pub fn new(executable: impl Into<PathBuf>, config: &AsrConfig) -> Self {
        Self {
            executable: executable.into(),
            model: config.model.clone(),
            vad_filter: config.vad_filter,
            vad_threshold: config.vad_threshold,
            initial_prompt: config.initial_prompt.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            progress: None,
        }
    }

    /// Use a model name or an installed model directory
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// `(-m value, --model_dir value)` for the configured model
    fn model_args(&self) -> (String, Option<PathBuf>) {
        let path = Path::new(&self.model);
        if !path.is_absolute() {
            return (self.model.clone(), None);
        }
        let folder = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = folder
            .strip_prefix(MODEL_DIR_PREFIX)
            .map(str::to_string)
            .unwrap_or(folder);
        (name, path.parent().map(Path::to_path_buf))
    }

    /// Full argument list for one run
    pub fn build_args(&self, audio: &Path, device: Device, language: Option<&str>, out_dir: &Path) -> Vec<OsString> {
        let (model, model_dir) = self.model_args();
        let mut args: Vec<OsString> = vec!["-m".into(), model.into()];
        if let Some(dir) = model_dir {
            args.push("--model_dir".into());
            args.push(dir.into_os_string());
        }
        args.push("--print_progress".into());
        args.push(audio.as_os_str().to_os_string());
        args.extend(["-d".into(), device.as_str().into()]);
        args.extend(["--output_format".into(), "srt".into()]);
        args.push("-o".into());
        args.push(out_dir.as_os_str().to_os_string());

        if let Some(language) = language {
            args.extend(["-l".into(), language.into()]);
        }
        if self.vad_filter {
            args.extend([
                "--vad_filter".into(),
                "true".into(),
                "--vad_threshold".into(),
                format!("{:.2}", self.vad_threshold).into(),
            ]);
        } else {
            args.extend(["--vad_filter".into(), "false".into()]);
        }
        if let Some(prompt) = self.initial_prompt.as_deref().filter(|p| !p.trim().is_empty()) {
            args.extend(["--initial_prompt".into(), prompt.into()]);
        }
        args.push("--beep_off".into());
        args
    }
}

/// Percentage reported on a progress line, if any
pub fn parse_progress(line: &str) -> Option<u8> {
    PROGRESS_REGEX
        .captures(line)
        .and_then(|c| c[1].parse::<u32>().ok())
        .filter(|p| *p <= 100)
        .map(|p| p as u8)
}

/// Normalized language tag from a `Detected language` line, if any
pub fn parse_detected_language(line: &str) -> Option<String> {
    let code = DETECTED_LANGUAGE_REGEX.captures(line)?.get(1)?.as_str();
    language_utils::normalize_language_tag(code)
}

/// Turn the engine's SRT output into a repaired document
pub fn decode_output(srt: &str, source: &Path) -> Result<SubtitleDocument, TranscriptionError> {
    let blocks = subtitle::parse_srt_blocks(srt).map_err(|e| TranscriptionError::DecodeError(e.to_string()))?;
    let document = SubtitleDocument::from_raw_segments(blocks);
    if document.is_empty() {
        return Err(TranscriptionError::EmptyAudio(source.display().to_string()));
    }
    Ok(document)
}

/// The engine names its output after the audio stem; fall back to any SRT
fn find_output(out_dir: &Path, audio: &Path) -> Option<PathBuf> {
    let expected = audio.file_stem().map(|stem| {
        let mut name = stem.to_os_string();
        name.push(".srt");
        out_dir.join(name)
    });
    if let Some(path) = expected.filter(|p| p.is_file()) {
        return Some(path);
    }
    std::fs::read_dir(out_dir)
        .ok()?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .find(|p| p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("srt")))
}

#[async_trait]
impl SpeechRecognizer for FasterWhisper {
    fn name(&self) -> &str {
        "faster-whisper"
    }

    async fn transcribe(
        &self,
        audio: &Path,
        device: Device,
        language_hint: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<SubtitleDocument, TranscriptionError> {
        if !self.executable.is_file() {
            return Err(TranscriptionError::EngineNotReady(format!(
                "executable not found at {}",
                self.executable.display()
            )));
        }

        let hint = language_hint.and_then(language_utils::normalize_language_tag);
        let out_dir = tempfile::Builder::new()
            .prefix("videoscribe-asr-")
            .tempdir()
            .map_err(|e| TranscriptionError::EngineNotReady(format!("cannot create output directory: {}", e)))?;

        let spec = ProcessSpec::new(self.executable.as_os_str())
            .args(self.build_args(audio, device, hint.as_deref(), out_dir.path()))
            .timeout(self.timeout);
        info!("Transcribing {:?} on {} with model {}", audio, device.as_str(), self.model);

        let mut last_progress: Option<u8> = None;
        let mut detected: Option<String> = None;
        let progress = self.progress.clone();
        let result = process_runner::run(
            &spec,
            |_, line| {
                if let Some(p) = parse_progress(line) {
                    if last_progress.is_none_or(|last| p > last) {
                        last_progress = Some(p);
                        info!("Transcription progress: {}%", p);
                        if let Some(callback) = &progress {
                            callback(p);
                        }
                    }
                } else if detected.is_none() {
                    detected = parse_detected_language(line);
                }
            },
            cancel,
        )
        .await;

        match result {
            Ok(_) => {}
            Err(ProcessError::SpawnFailure { program, message }) => {
                return Err(TranscriptionError::EngineNotReady(format!("{}: {}", program, message)));
            }
            Err(e) => return Err(e.into()),
        }

        let output = find_output(out_dir.path(), audio).ok_or_else(|| {
            TranscriptionError::DecodeError(format!("engine wrote no subtitle file for {}", audio.display()))
        })?;
        let srt = std::fs::read_to_string(&output)
            .map_err(|e| TranscriptionError::DecodeError(format!("cannot read {}: {}", output.display(), e)))?;
        let document = decode_output(&srt, audio)?;

        let language = hint.or(detected);
        match &language {
            Some(tag) => debug!("Transcript language: {}", tag),
            None => warn!("Engine did not report a language for {:?}", audio),
        }
        info!("Transcribed {} segments", document.len());
        Ok(document.with_language(language))
    }
}
