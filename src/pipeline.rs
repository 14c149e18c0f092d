use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use log::{debug, error, info, warn};
use serde::Serialize;

use crate::app_config::{Config, Device};
use crate::asr::{FasterWhisper, SpeechRecognizer};
use crate::cancel::CancellationToken;
use crate::chunker;
use crate::downloader::Downloader;
use crate::errors::{AppError, ModelError};
use crate::file_utils::FileManager;
use crate::language_utils;
use crate::optimizer::{self, OptimizationResult, OptimizationStatus, Optimizer, OptimizerSettings};
use crate::providers::{self, Provider};
use crate::resources::ResourceProvisioner;
use crate::subtitle::{OutputFormat, SubtitleDocument};

// @module: End-to-end orchestration from source reference to written subtitles

/// One pipeline invocation
#[derive(Debug, Clone, Default)]
pub struct PipelineRequest {
    /// URL or local media path
    pub source: String,
    /// Output file; the extension picks SRT, TXT or JSON
    pub output: PathBuf,
    /// Free text steering the corrections
    pub context: Option<String>,
    /// Overrides the configured device
    pub device: Option<Device>,
    /// Overrides the configured language hint
    pub language: Option<String>,
}

impl PipelineRequest {
    pub fn new(source: impl Into<String>, output: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            output: output.into(),
            ..Default::default()
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

/// Per-chunk flag for report writers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkStatus {
    pub chunk_index: usize,
    pub first_segment: usize,
    pub segment_count: usize,
    pub status: OptimizationStatus,
    pub attempts: u32,
    pub error: Option<String>,
}

impl From<&OptimizationResult> for ChunkStatus {
    fn from(result: &OptimizationResult) -> Self {
        Self {
            chunk_index: result.chunk_index,
            first_segment: result.first_segment,
            segment_count: result.texts.len(),
            status: result.status,
            attempts: result.attempts,
            error: result.error.clone(),
        }
    }
}

/// What a finished run produced
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub document: SubtitleDocument,
    pub chunk_statuses: Vec<ChunkStatus>,
    pub output_path: PathBuf,
}

impl PipelineReport {
    /// Chunks that kept their original text
    pub fn fallback_count(&self) -> usize {
        self.chunk_statuses
            .iter()
            .filter(|s| s.status == OptimizationStatus::FallbackToOriginal)
            .count()
    }
}

/// Outcome of processing every media file in a directory
#[derive(Debug, Default)]
pub struct BatchReport {
    pub completed: Vec<PipelineReport>,
    /// Inputs whose transcription failed, with the reason
    pub failed: Vec<(PathBuf, String)>,
}

/// Download, transcribe, optimize and write subtitles
pub struct Pipeline {
    // @field: Effective configuration after CLI overrides
    config: Config,
    provisioner: Arc<ResourceProvisioner>,
    downloader: Downloader,
    // @field: Injected recognizer; built from the provisioned engine when absent
    recognizer: Option<Arc<dyn SpeechRecognizer>>,
    // @field: Injected provider; built from config when absent
    provider: Option<Arc<dyn Provider>>,
}

impl Pipeline {
    pub fn new(config: Config) -> Result<Self, AppError> {
        let provisioner = Arc::new(ResourceProvisioner::with_defaults(config.cache_dir.clone())?);
        let downloader = Downloader::new(config.download.clone());
        Ok(Self {
            config,
            provisioner,
            downloader,
            recognizer: None,
            provider: None,
        })
    }

    pub fn with_provisioner(mut self, provisioner: Arc<ResourceProvisioner>) -> Self {
        self.provisioner = provisioner;
        self
    }

    pub fn with_recognizer(mut self, recognizer: Arc<dyn SpeechRecognizer>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Full run: provision, resolve, transcribe, optimize, merge, write
    pub async fn run(&self, request: &PipelineRequest, cancel: &CancellationToken) -> Result<PipelineReport, AppError> {
        let start_time = Instant::now();
        let recognizer = self.prepare_recognizer(cancel).await?;
        let report = self.run_with(recognizer.as_ref(), request, true, cancel).await?;
        info!(
            "Finished {} in {:.1}s ({} segments, {} fallback chunks)",
            request.source,
            start_time.elapsed().as_secs_f64(),
            report.document.len(),
            report.fallback_count()
        );
        Ok(report)
    }

    /// Provision, resolve and transcribe, without model corrections
    pub async fn transcribe_only(
        &self,
        request: &PipelineRequest,
        cancel: &CancellationToken,
    ) -> Result<PipelineReport, AppError> {
        let recognizer = self.prepare_recognizer(cancel).await?;
        self.run_with(recognizer.as_ref(), request, false, cancel).await
    }

    /// Correct an existing SRT file and write the result
    pub async fn optimize_file(
        &self,
        input: &Path,
        output: &Path,
        context: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<PipelineReport, AppError> {
        let content = FileManager::read_to_string(input).map_err(|e| AppError::File(format!("{:#}", e)))?;
        let document = SubtitleDocument::parse_srt(&content)?.with_context(context);
        info!("Loaded {} segments from {:?}", document.len(), input);

        let (document, results) = self.optimize_document(&document, cancel).await?;
        self.finish(document, &results, output, cancel)
    }

    /// Run every media file under `input_dir`, writing `<stem>.<extension>`
    /// into `output_dir`.
    ///
    /// A failed download or transcription is recorded and the batch moves on.
    /// Provisioning failures and cancellation stop the batch.
    pub async fn run_batch(
        &self,
        input_dir: &Path,
        output_dir: &Path,
        extension: &str,
        context: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<BatchReport, AppError> {
        let inputs = FileManager::find_media_files(input_dir).map_err(|e| AppError::File(format!("{:#}", e)))?;
        info!("Found {} media files in {:?}", inputs.len(), input_dir);
        let recognizer = self.prepare_recognizer(cancel).await?;

        let mut report = BatchReport::default();
        for input in inputs {
            let request = PipelineRequest {
                source: input.to_string_lossy().into_owned(),
                output: FileManager::generate_output_path(&input, output_dir, extension),
                context: context.clone(),
                device: None,
                language: None,
            };
            match self.run_with(recognizer.as_ref(), &request, true, cancel).await {
                Ok(done) => report.completed.push(done),
                Err(e) if e.is_cancelled() => return Err(AppError::Cancelled),
                Err(e @ (AppError::Download(_) | AppError::Transcription(_) | AppError::Process(_))) => {
                    error!("Skipping {:?}: {}", input, e);
                    report.failed.push((input, e.to_string()));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(report)
    }

    /// Chunk, optimize in parallel and merge.
    ///
    /// With optimization disabled the document comes back unchanged and no
    /// chunk results are produced.
    pub async fn optimize_document(
        &self,
        document: &SubtitleDocument,
        cancel: &CancellationToken,
    ) -> Result<(SubtitleDocument, Vec<OptimizationResult>), AppError> {
        if !self.config.optimize.enabled {
            debug!("Optimization disabled, keeping the raw transcript");
            return Ok((document.clone(), Vec::new()));
        }

        let chunks = chunker::split(
            document,
            self.config.optimize.max_unit_budget,
            self.config.optimize.unit_cost.into(),
        );
        let optimizer = Optimizer::new(self.provider()?, OptimizerSettings::from_config(&self.config));
        let results = optimizer
            .optimize_all(&chunks, document.context(), cancel)
            .await
            .map_err(|e| match e {
                ModelError::Cancelled => AppError::Cancelled,
                other => AppError::Unknown(other.to_string()),
            })?;

        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        Ok((optimizer::merge(document, &results), results))
    }

    async fn run_with(
        &self,
        recognizer: &dyn SpeechRecognizer,
        request: &PipelineRequest,
        optimize: bool,
        cancel: &CancellationToken,
    ) -> Result<PipelineReport, AppError> {
        let asset = self.downloader.resolve(&request.source, cancel).await.map_err(cancelled_or)?;
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        let device = request.device.unwrap_or(self.config.asr.device);
        let language = request.language.as_deref().or(self.config.asr.language.as_deref());
        let document = recognizer
            .transcribe(asset.path(), device, language, cancel)
            .await
            .map_err(cancelled_or)?
            .with_context(request.context.clone());
        if let (Some(requested), Some(detected)) = (language, document.language()) {
            if !language_utils::language_codes_match(requested, detected) {
                warn!("Requested language '{}' but the engine reported '{}'", requested, detected);
            }
        }
        // The audio is no longer needed once transcribed
        if asset.is_temporary() {
            debug!("Removing downloaded audio {:?}", asset.path());
        }
        drop(asset);

        let (document, results) = if optimize {
            self.optimize_document(&document, cancel).await?
        } else {
            (document, Vec::new())
        };
        self.finish(document, &results, &request.output, cancel)
    }

    /// Write the document unless the run was cancelled
    fn finish(
        &self,
        document: SubtitleDocument,
        results: &[OptimizationResult],
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<PipelineReport, AppError> {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        let format = OutputFormat::from_path(output);
        FileManager::write_to_file(output, &document.render(format)).map_err(|e| AppError::File(format!("{:#}", e)))?;
        info!("Wrote {} segments to {:?}", document.len(), output);

        Ok(PipelineReport {
            document,
            chunk_statuses: results.iter().map(ChunkStatus::from).collect(),
            output_path: output.to_path_buf(),
        })
    }

    /// The injected recognizer, or faster-whisper from the provisioned engine
    async fn prepare_recognizer(&self, cancel: &CancellationToken) -> Result<Arc<dyn SpeechRecognizer>, AppError> {
        if let Some(recognizer) = &self.recognizer {
            return Ok(Arc::clone(recognizer));
        }
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        let asr = &self.config.asr;
        let executable = self.provisioner.ensure(&asr.engine).await?;
        let mut engine = FasterWhisper::new(executable, asr);
        if let Some(model) = asr.model_resource() {
            self.provisioner.ensure(&model).await?;
            let model_dir = self.provisioner.install_dir(&model);
            engine = engine.with_model(model_dir.to_string_lossy().into_owned());
        }
        debug!("Using ASR engine {:?}", engine.executable());
        Ok(Arc::new(engine))
    }

    fn provider(&self) -> Result<Arc<dyn Provider>, AppError> {
        match &self.provider {
            Some(provider) => Ok(Arc::clone(provider)),
            None => {
                let provider = providers::create_provider(&self.config)?;
                if self.config.get_api_key().is_empty() && self.config.provider.api_key_env_var().is_some() {
                    warn!("No API key configured for {}", self.config.provider.display_name());
                }
                Ok(provider)
            }
        }
    }
}

/// Collapse stage errors caused by cancellation into `AppError::Cancelled`
fn cancelled_or<E: Into<AppError>>(error: E) -> AppError {
    let error = error.into();
    if error.is_cancelled() { AppError::Cancelled } else { error }
}
