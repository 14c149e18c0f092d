use serde::{Deserialize, Serialize};
use std::default::Default;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::chunker::UnitCost;
use crate::errors::ConfigError;
use crate::resources::{RemoteFile, ResourceSpec};
use crate::retry::RetryPolicy;

/// Application configuration module
/// This module handles loading, validating and saving the JSON configuration
/// consumed by the pipeline: provider credentials, ASR engine settings,
/// download tools and optimizer tuning.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Active language model provider
    #[serde(default)]
    pub provider: ProviderKind,

    /// Per-provider settings
    #[serde(default = "default_available_providers")]
    pub available_providers: Vec<ProviderConfig>,

    /// Speech recognition settings
    #[serde(default)]
    pub asr: AsrConfig,

    /// Source download settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// Transcript optimization settings
    #[serde(default)]
    pub optimize: OptimizeConfig,

    /// Shared cache for engine binaries and models
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,
}

/// Language model provider type
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    // @provider: Any OpenAI-compatible chat completions endpoint
    #[default]
    OpenAI,
    // @provider: Anthropic
    Anthropic,
    // @provider: Ollama
    Ollama,
}

impl ProviderKind {
    // @returns: Capitalized provider name
    pub fn display_name(&self) -> &str {
        match self {
            Self::OpenAI => "OpenAI",
            Self::Anthropic => "Anthropic",
            Self::Ollama => "Ollama",
        }
    }

    // @returns: Lowercase provider identifier
    pub fn to_lowercase_string(&self) -> String {
        match self {
            Self::OpenAI => "openai".to_string(),
            Self::Anthropic => "anthropic".to_string(),
            Self::Ollama => "ollama".to_string(),
        }
    }

    /// Environment variable consulted when no key is configured
    pub fn api_key_env_var(&self) -> Option<&'static str> {
        match self {
            Self::OpenAI => Some("OPENAI_API_KEY"),
            Self::Anthropic => Some("ANTHROPIC_API_KEY"),
            Self::Ollama => None,
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_lowercase_string())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "anthropic" => Ok(Self::Anthropic),
            "ollama" => Ok(Self::Ollama),
            _ => Err(ConfigError::Invalid(format!("Invalid provider type: {}", s))),
        }
    }
}

/// Provider configuration wrapper
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProviderConfig {
    // @field: Provider type identifier
    #[serde(rename = "type")]
    pub provider_type: ProviderKind,

    // @field: Model name
    #[serde(default = "String::new")]
    pub model: String,

    // @field: API key
    #[serde(default = "String::new")]
    pub api_key: String,

    // @field: Service URL
    #[serde(default = "String::new")]
    pub endpoint: String,

    // @field: Request timeout seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl ProviderConfig {
    // @param provider_type: Provider enum
    // @returns: Provider config with defaults
    pub fn new(provider_type: ProviderKind) -> Self {
        Self {
            provider_type,
            model: default_model(provider_type),
            api_key: String::new(),
            endpoint: default_endpoint(provider_type),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Compute device for the ASR engine
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    #[default]
    Cpu,
    Cuda,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Cuda => "cuda",
        }
    }
}

impl std::str::FromStr for Device {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda),
            _ => Err(ConfigError::Invalid(format!("Invalid device: {}", s))),
        }
    }
}

/// Speech recognition configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AsrConfig {
    /// Engine resource, resolved through the provisioner
    #[serde(default = "default_engine_resource")]
    pub engine: ResourceSpec,

    /// Model name (e.g. "large-v2") or absolute model directory
    #[serde(default = "default_asr_model")]
    pub model: String,

    /// Download the model into the cache instead of letting the engine do it
    #[serde(default)]
    pub download_model: bool,

    #[serde(default)]
    pub device: Device,

    /// Language hint; auto-detected when absent
    #[serde(default)]
    pub language: Option<String>,

    #[serde(default = "default_true")]
    pub vad_filter: bool,

    #[serde(default = "default_vad_threshold")]
    pub vad_threshold: f32,

    /// Text the engine uses to bias its vocabulary
    #[serde(default)]
    pub initial_prompt: Option<String>,

    /// Upper bound for one transcription run
    #[serde(default = "default_asr_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AsrConfig {
    fn default() -> Self {
        Self {
            engine: default_engine_resource(),
            model: default_asr_model(),
            download_model: false,
            device: Device::default(),
            language: None,
            vad_filter: true,
            vad_threshold: default_vad_threshold(),
            initial_prompt: None,
            timeout_secs: default_asr_timeout_secs(),
        }
    }
}

impl AsrConfig {
    /// Model files fetched into the cache when `download_model` is set
    pub fn model_resource(&self) -> Option<ResourceSpec> {
        if !self.download_model || Path::new(&self.model).is_absolute() {
            return None;
        }
        let repo = format!("https://huggingface.co/Systran/faster-whisper-{}/resolve/main", self.model);
        let files = ["config.json", "model.bin", "tokenizer.json", "vocabulary.txt"]
            .iter()
            .map(|name| RemoteFile {
                url: format!("{}/{}", repo, name),
                file_name: name.to_string(),
                sha256: None,
                unpack: None,
            })
            .collect();
        Some(ResourceSpec {
            name: format!("faster-whisper-{}", self.model),
            version: String::new(),
            files,
            entry: String::new(),
            executable: false,
        })
    }
}

/// Source download configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DownloadConfig {
    #[serde(default = "default_ytdlp_path")]
    pub ytdlp_path: String,

    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: String,

    /// Probe local files for an audio stream before transcribing
    #[serde(default = "default_true")]
    pub probe_local_files: bool,

    #[serde(default = "default_download_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            ytdlp_path: default_ytdlp_path(),
            ffprobe_path: default_ffprobe_path(),
            probe_local_files: true,
            timeout_secs: default_download_timeout_secs(),
        }
    }
}

/// How chunk size is measured
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum UnitCostKind {
    #[default]
    Chars,
    Tokens,
}

impl From<UnitCostKind> for UnitCost {
    fn from(kind: UnitCostKind) -> Self {
        match kind {
            UnitCostKind::Chars => UnitCost::Chars,
            UnitCostKind::Tokens => UnitCost::EstimatedTokens,
        }
    }
}

/// Transcript optimization configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OptimizeConfig {
    /// Skip the language model entirely when false
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum simultaneous model calls
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Chunk budget in `unit_cost` units
    #[serde(default = "default_max_unit_budget")]
    pub max_unit_budget: usize,

    #[serde(default)]
    pub unit_cost: UnitCostKind,

    /// Attempts per chunk including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Temperature parameter for text generation (0.0 to 1.0)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Instructions sent as the system message
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Reject corrections that drift too far from the original line
    #[serde(default = "default_true")]
    pub similarity_guard: bool,
}

impl Default for OptimizeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            concurrency: default_concurrency(),
            max_unit_budget: default_max_unit_budget(),
            unit_cost: UnitCostKind::default(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            temperature: default_temperature(),
            system_prompt: default_system_prompt(),
            similarity_guard: true,
        }
    }
}

impl OptimizeConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

/// Log verbosity level
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

fn default_available_providers() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig::new(ProviderKind::OpenAI),
        ProviderConfig::new(ProviderKind::Anthropic),
        ProviderConfig::new(ProviderKind::Ollama),
    ]
}

fn default_model(kind: ProviderKind) -> String {
    match kind {
        ProviderKind::OpenAI => "gpt-4o-mini".to_string(),
        ProviderKind::Anthropic => "claude-3-haiku-20240307".to_string(),
        ProviderKind::Ollama => "llama3.2:3b".to_string(),
    }
}

fn default_endpoint(kind: ProviderKind) -> String {
    match kind {
        ProviderKind::OpenAI => "https://api.openai.com/v1".to_string(),
        ProviderKind::Anthropic => "https://api.anthropic.com".to_string(),
        ProviderKind::Ollama => "http://localhost:11434".to_string(),
    }
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("videoscribe")
}

fn default_engine_resource() -> ResourceSpec {
    ResourceSpec::system("faster-whisper-xxl")
}

fn default_asr_model() -> String {
    "large-v2".to_string()
}

fn default_vad_threshold() -> f32 {
    0.5
}

fn default_asr_timeout_secs() -> u64 {
    3 * 60 * 60
}

fn default_ytdlp_path() -> String {
    "yt-dlp".to_string()
}

fn default_ffprobe_path() -> String {
    "ffprobe".to_string()
}

fn default_download_timeout_secs() -> u64 {
    30 * 60
}

fn default_concurrency() -> usize {
    4
}

fn default_max_unit_budget() -> usize {
    1000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    2000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_temperature() -> f32 {
    0.2
}

fn default_true() -> bool {
    true
}

fn default_system_prompt() -> String {
    r#"You are a subtitle proofreader. You receive subtitle lines produced by speech recognition as a JSON object that maps line numbers to text.

Correct recognition errors, spelling and terminology. Remove filler words and disfluencies such as "um", "uh" or stuttered repeats without changing the meaning.

Rules:
- Keep the original language. Never translate.
- Return exactly the same keys with one corrected string per key. Never merge, split, add or drop lines.
- When reference text is supplied, use it to resolve names and technical terms.
- Output ONLY the JSON object, without commentary or code fences."#
        .to_string()
}

/// Append `/v1` to OpenAI-compatible base URLs that lack a version segment
pub fn normalize_openai_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return default_endpoint(ProviderKind::OpenAI);
    }
    match url::Url::parse(trimmed) {
        Ok(parsed) if parsed.path().trim_matches('/').is_empty() => format!("{}/v1", trimmed),
        _ => trimmed.to_string(),
    }
}

impl Config {
    /// Load configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let load_error = |message: String| ConfigError::Load {
            path: path.to_path_buf(),
            message,
        };
        let file = File::open(path).map_err(|e| load_error(e.to_string()))?;
        serde_json::from_reader(BufReader::new(file)).map_err(|e| load_error(e.to_string()))
    }

    /// Write configuration as pretty JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| ConfigError::Load {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Validate the configuration for consistency and required values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.optimize.concurrency == 0 {
            return Err(ConfigError::Invalid("optimize.concurrency must be at least 1".to_string()));
        }
        if self.optimize.max_unit_budget == 0 {
            return Err(ConfigError::Invalid("optimize.max_unit_budget must be at least 1".to_string()));
        }
        if let Some(language) = &self.asr.language {
            if !crate::language_utils::is_valid_language(language) {
                return Err(ConfigError::Invalid(format!("Unknown language hint: {}", language)));
            }
        }
        if self.optimize.enabled && self.provider != ProviderKind::Ollama && self.get_api_key().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "API key is required for {} provider",
                self.provider.display_name()
            )));
        }
        Ok(())
    }

    /// Get the active provider configuration from the available_providers array
    pub fn get_active_provider_config(&self) -> Option<&ProviderConfig> {
        self.available_providers
            .iter()
            .find(|p| p.provider_type == self.provider)
    }

    /// Mutable access to the active provider entry, created if missing
    pub fn active_provider_config_mut(&mut self) -> &mut ProviderConfig {
        let kind = self.provider;
        let position = match self.available_providers.iter().position(|p| p.provider_type == kind) {
            Some(position) => position,
            None => {
                self.available_providers.push(ProviderConfig::new(kind));
                self.available_providers.len() - 1
            }
        };
        &mut self.available_providers[position]
    }

    /// Get the model for the active provider
    pub fn get_model(&self) -> String {
        self.get_active_provider_config()
            .map(|p| p.model.clone())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| default_model(self.provider))
    }

    /// API key for the active provider, falling back to the environment
    pub fn get_api_key(&self) -> String {
        if let Some(key) = self
            .get_active_provider_config()
            .map(|p| p.api_key.clone())
            .filter(|k| !k.is_empty())
        {
            return key;
        }
        self.provider
            .api_key_env_var()
            .and_then(|var| std::env::var(var).ok())
            .unwrap_or_default()
    }

    /// Endpoint for the active provider, normalized for OpenAI-compatible APIs
    pub fn get_endpoint(&self) -> String {
        let endpoint = self
            .get_active_provider_config()
            .map(|p| p.endpoint.clone())
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| default_endpoint(self.provider));
        match self.provider {
            ProviderKind::OpenAI => normalize_openai_endpoint(&endpoint),
            _ => endpoint,
        }
    }

    pub fn get_timeout(&self) -> Duration {
        Duration::from_secs(
            self.get_active_provider_config()
                .map(|p| p.timeout_secs)
                .unwrap_or_else(default_timeout_secs),
        )
    }
}

/// Default implementation for Config
impl Default for Config {
    fn default() -> Self {
        Config {
            provider: ProviderKind::default(),
            available_providers: default_available_providers(),
            asr: AsrConfig::default(),
            download: DownloadConfig::default(),
            optimize: OptimizeConfig::default(),
            cache_dir: default_cache_dir(),
            log_level: LogLevel::default(),
        }
    }
}
