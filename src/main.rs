// Module-specific lints configuration
#![allow(clippy::uninlined_format_args)]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{Shell, generate};
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError, error, info, warn};

use videoscribe::app_config::{self, Config, Device, ProviderKind};
use videoscribe::errors::AppError;
use videoscribe::language_utils;
use videoscribe::optimizer::OptimizationStatus;
use videoscribe::{CancellationToken, Pipeline, PipelineReport, PipelineRequest};

/// CLI Wrapper for ProviderKind to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliProvider {
    #[value(name = "openai")]
    OpenAI,
    Anthropic,
    Ollama,
}

impl From<CliProvider> for ProviderKind {
    fn from(cli_provider: CliProvider) -> Self {
        match cli_provider {
            CliProvider::OpenAI => ProviderKind::OpenAI,
            CliProvider::Anthropic => ProviderKind::Anthropic,
            CliProvider::Ollama => ProviderKind::Ollama,
        }
    }
}

/// CLI Wrapper for Device to implement ValueEnum
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliDevice {
    Cpu,
    Cuda,
}

impl From<CliDevice> for Device {
    fn from(cli_device: CliDevice) -> Self {
        match cli_device {
            CliDevice::Cpu => Device::Cpu,
            CliDevice::Cuda => Device::Cuda,
        }
    }
}

/// CLI Wrapper for LogLevel to implement ValueEnum
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for app_config::LogLevel {
    fn from(cli_level: CliLogLevel) -> Self {
        match cli_level {
            CliLogLevel::Error => app_config::LogLevel::Error,
            CliLogLevel::Warn => app_config::LogLevel::Warn,
            CliLogLevel::Info => app_config::LogLevel::Info,
            CliLogLevel::Debug => app_config::LogLevel::Debug,
            CliLogLevel::Trace => app_config::LogLevel::Trace,
        }
    }
}

/// Language model overrides shared by `run` and `optimize`
#[derive(clap::Args, Debug, Default)]
struct ModelArgs {
    /// Language model provider to use
    #[arg(short, long, value_enum)]
    provider: Option<CliProvider>,

    /// Language model name
    #[arg(short, long)]
    model: Option<String>,

    /// API key for the provider (falls back to OPENAI_API_KEY / ANTHROPIC_API_KEY)
    #[arg(long)]
    api_key: Option<String>,

    /// Provider endpoint (OpenAI-compatible URLs get /v1 appended when missing)
    #[arg(long)]
    base_url: Option<String>,

    /// Free text used to resolve names and terms (e.g. the video description)
    #[arg(short, long)]
    context: Option<String>,

    /// Maximum concurrent model calls
    #[arg(long)]
    concurrency: Option<usize>,

    /// Chunk budget in configured units
    #[arg(long)]
    budget: Option<usize>,
}

/// Speech recognition overrides shared by `run` and `transcribe`
#[derive(clap::Args, Debug, Default)]
struct AsrArgs {
    /// Compute device for the ASR engine
    #[arg(short, long, value_enum)]
    device: Option<CliDevice>,

    /// Language hint (e.g. 'en', 'de'); detected when omitted
    #[arg(short, long)]
    language: Option<String>,

    /// ASR model name or absolute model directory
    #[arg(long)]
    asr_model: Option<String>,

    /// Abort the whole run after this many seconds
    #[arg(long)]
    timeout: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Download, transcribe and correct a video (URL, file or directory)
    Run {
        /// Video URL, local media file or directory of media files
        #[arg(value_name = "SOURCE")]
        source: String,

        /// Output file (.srt, .txt or .json), or directory for directory sources
        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        asr: AsrArgs,

        #[command(flatten)]
        model: ModelArgs,
    },

    /// Download and transcribe without language model corrections
    Transcribe {
        #[arg(value_name = "SOURCE")]
        source: String,

        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        asr: AsrArgs,
    },

    /// Correct an existing SRT file
    Optimize {
        #[arg(value_name = "SRT")]
        input: PathBuf,

        /// Output file; defaults to <input>_optimized.srt
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Abort after this many seconds
        #[arg(long)]
        timeout: Option<u64>,

        #[command(flatten)]
        model: ModelArgs,
    },

    /// Generate shell completions for videoscribe
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// videoscribe - video to corrected transcript
///
/// Downloads only the audio of a video, transcribes it with faster-whisper and
/// lets a language model fix recognition errors while keeping every timestamp.
#[derive(Parser, Debug)]
#[command(name = "videoscribe")]
#[command(version)]
#[command(about = "Video transcription with language model correction")]
#[command(long_about = "videoscribe turns a video into a cleaned-up, timed transcript.

EXAMPLES:
    videoscribe run https://youtu.be/abc -o talk.srt          # Download, transcribe, correct
    videoscribe run talk.mp4 -o talk.json -c \"Pythagorean theorem lecture\"
    videoscribe run ./videos -o ./subtitles                    # Every media file in a directory
    videoscribe transcribe talk.mp4 -o raw.srt -d cuda         # Transcript only
    videoscribe optimize raw.srt -o fixed.srt --concurrency 8  # Correct an existing SRT
    videoscribe completions bash > videoscribe.bash

CONFIGURATION:
    Configuration is stored in conf.json by default. You can specify a different
    config file with --config-path. If the config file doesn't exist, a default one
    will be created automatically.")]
struct CommandLineOptions {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(long, global = true, default_value = "conf.json")]
    config_path: String,

    /// Set logging level
    #[arg(long, global = true, value_enum)]
    log_level: Option<CliLogLevel>,
}

// @struct: Custom logger implementation; the level lives in `log::max_level`
struct CustomLogger;

impl CustomLogger {
    // @initializes: Global logger
    fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
        log::set_boxed_logger(Box::new(CustomLogger))?;
        log::set_max_level(level);
        Ok(())
    }

    // @returns: ANSI colour for log level
    fn color_for_level(level: Level) -> &'static str {
        match level {
            Level::Error => "\x1B[1;31m",
            Level::Warn => "\x1B[1;33m",
            Level::Info => "\x1B[1;32m",
            Level::Debug => "\x1B[1;36m",
            Level::Trace => "\x1B[1;35m",
        }
    }
}

impl Log for CustomLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let now = chrono::Local::now().format("%H:%M:%S.%3f");
            let mut stderr = std::io::stderr();
            let _ = writeln!(
                stderr,
                "{}{} {:<5} {}\x1B[0m",
                Self::color_for_level(record.level()),
                now,
                record.level(),
                record.args()
            );
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

#[tokio::main]
async fn main() {
    // Info until the config has been read
    if let Err(e) = CustomLogger::init(LevelFilter::Info) {
        eprintln!("Failed to initialize logger: {}", e);
    }

    let cli = CommandLineOptions::parse();
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = CommandLineOptions::command();
        generate(*shell, &mut cmd, "videoscribe", &mut std::io::stdout());
        return;
    }

    if let Err(e) = run_command(cli).await {
        error!("{}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run_command(cli: CommandLineOptions) -> Result<(), AppError> {
    if let Some(level) = cli.log_level {
        log::set_max_level(app_config::LogLevel::from(level).into());
    }
    let mut config = load_or_create_config(&cli.config_path)?;
    if let Some(level) = cli.log_level {
        config.log_level = level.into();
    } else {
        log::set_max_level(config.log_level.into());
    }

    match cli.command {
        Commands::Run {
            source,
            output,
            asr,
            model,
        } => {
            let timeout = asr.timeout;
            let request = apply_asr_args(&mut config, &source, &output, &asr);
            let context = apply_model_args(&mut config, &model);
            config.validate()?;

            let cancel = install_cancel(timeout);
            let pipeline = Pipeline::new(config)?;
            if Path::new(&source).is_dir() {
                let batch = pipeline.run_batch(Path::new(&source), &output, "srt", context, &cancel).await?;
                for report in &batch.completed {
                    summarize(report);
                }
                if !batch.failed.is_empty() {
                    warn!("{} of {} inputs failed", batch.failed.len(), batch.failed.len() + batch.completed.len());
                }
            } else {
                let request = PipelineRequest { context, ..request };
                summarize(&pipeline.run(&request, &cancel).await?);
            }
        }
        Commands::Transcribe { source, output, asr } => {
            let timeout = asr.timeout;
            let request = apply_asr_args(&mut config, &source, &output, &asr);
            config.optimize.enabled = false;
            config.validate()?;

            let cancel = install_cancel(timeout);
            summarize(&Pipeline::new(config)?.transcribe_only(&request, &cancel).await?);
        }
        Commands::Optimize {
            input,
            output,
            timeout,
            model,
        } => {
            let context = apply_model_args(&mut config, &model);
            config.validate()?;
            let output = output.unwrap_or_else(|| default_optimized_path(&input));

            let cancel = install_cancel(timeout);
            let report = Pipeline::new(config)?.optimize_file(&input, &output, context, &cancel).await?;
            summarize(&report);
        }
        Commands::Completions { .. } => {}
    }
    Ok(())
}

/// Load the config file, writing a default one when it does not exist
fn load_or_create_config(config_path: &str) -> Result<Config, AppError> {
    if Path::new(config_path).exists() {
        return Ok(Config::load(config_path)?);
    }
    warn!("Config file not found at '{}', creating default config.", config_path);
    let config = Config::default();
    config.save(config_path)?;
    Ok(config)
}

fn apply_asr_args(config: &mut Config, source: &str, output: &Path, asr: &AsrArgs) -> PipelineRequest {
    if let Some(model) = &asr.asr_model {
        config.asr.model = model.clone();
    }
    if let Some(language) = &asr.language {
        config.asr.language = Some(language.clone());
    }
    PipelineRequest {
        source: source.to_string(),
        output: output.to_path_buf(),
        context: None,
        device: asr.device.map(Device::from),
        language: asr.language.clone(),
    }
}

/// Apply provider overrides and return the context string
fn apply_model_args(config: &mut Config, model: &ModelArgs) -> Option<String> {
    if let Some(provider) = &model.provider {
        config.provider = provider.clone().into();
    }
    let provider_config = config.active_provider_config_mut();
    if let Some(name) = &model.model {
        provider_config.model = name.clone();
    }
    if let Some(key) = &model.api_key {
        provider_config.api_key = key.clone();
    }
    if let Some(url) = &model.base_url {
        provider_config.endpoint = url.clone();
    }
    if let Some(concurrency) = model.concurrency {
        config.optimize.concurrency = concurrency;
    }
    if let Some(budget) = model.budget {
        config.optimize.max_unit_budget = budget;
    }
    model.context.clone()
}

/// Token cancelled by Ctrl-C and, when given, by the timeout
fn install_cancel(timeout_secs: Option<u64>) -> CancellationToken {
    let cancel = match timeout_secs {
        Some(secs) => CancellationToken::with_timeout(Duration::from_secs(secs)),
        None => CancellationToken::new(),
    };
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling");
            on_signal.cancel();
        }
    });
    cancel
}

fn default_optimized_path(input: &Path) -> PathBuf {
    let stem = input.file_stem().unwrap_or_default().to_string_lossy();
    input.with_file_name(format!("{}_optimized.srt", stem))
}

fn summarize(report: &PipelineReport) {
    info!("Success: {:?} ({} segments)", report.output_path, report.document.len());
    if let Some(language) = report.document.language() {
        match language_utils::get_language_name(language) {
            Some(name) => info!("Language: {} ({})", language, name),
            None => info!("Language: {}", language),
        }
    }
    for status in report
        .chunk_statuses
        .iter()
        .filter(|s| s.status == OptimizationStatus::FallbackToOriginal)
    {
        warn!(
            "Chunk {} (segments {}-{}) kept its original text: {}",
            status.chunk_index,
            status.first_segment + 1,
            status.first_segment + status.segment_count,
            status.error.as_deref().unwrap_or("unknown error")
        );
    }
}
