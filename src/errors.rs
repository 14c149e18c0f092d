/*!
 * Error types for the videoscribe pipeline.
 *
 * Every stage gets its own error enum so callers can tell a failed download
 * from a failed transcription without string matching. `AppError` wraps them
 * all and maps each category to a process exit code.
 */

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while provisioning the ASR engine and its assets
#[derive(Error, Debug)]
pub enum ResourceFetchError {
    /// Network failure after all retries were spent
    #[error("Failed to fetch {url} after {attempts} attempts: {message}")]
    Network {
        url: String,
        attempts: u32,
        message: String,
    },

    /// Downloaded bytes did not hash to the expected value
    #[error("Checksum mismatch for {file}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        file: String,
        expected: String,
        actual: String,
    },

    /// System resource could not be located on PATH
    #[error("Resource '{0}' not found on PATH")]
    NotFound(String),

    /// Install lock could not be acquired
    #[error("Failed to acquire install lock for '{0}'")]
    Lock(String),

    /// A downloaded archive could not be unpacked
    #[error("Failed to unpack {file}: {message}")]
    Unpack { file: String, message: String },

    /// The HTTP client could not be set up
    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    /// Local file system failure in the cache directory
    #[error("Cache I/O error at {path}: {message}")]
    Io { path: PathBuf, message: String },
}

/// Errors while turning a source reference into a local audio file
#[derive(Error, Debug)]
pub enum DownloadError {
    /// Source is neither an http(s) URL nor a known media file
    #[error("Unsupported source: {0}")]
    UnsupportedSource(String),

    /// The media has no audio stream to extract
    #[error("No audio stream in {0}")]
    NoAudioStream(String),

    /// The extraction tool failed while talking to the network
    #[error("Network failure while downloading: {0}")]
    NetworkFailure(String),

    /// The extraction tool exited with a non-zero status
    #[error("Download tool exited with code {code:?}: {tail}")]
    ToolExitNonzero { code: Option<i32>, tail: String },

    /// Download was cancelled before it finished
    #[error("Download cancelled")]
    Cancelled,

    /// Any other process-level failure (spawn, timeout)
    #[error("Download process error: {0}")]
    Process(#[from] ProcessError),
}

/// Errors from supervised external processes
#[derive(Error, Debug)]
pub enum ProcessError {
    /// Process ran to completion but reported failure
    #[error("'{program}' exited with code {code:?}\n{}", .tail.join("\n"))]
    NonzeroExit {
        program: String,
        code: Option<i32>,
        tail: Vec<String>,
    },

    /// Process exceeded its time budget and was killed
    #[error("'{program}' timed out after {timeout_secs}s\n{}", .tail.join("\n"))]
    Timeout {
        program: String,
        timeout_secs: u64,
        tail: Vec<String>,
    },

    /// Process was killed because the run was cancelled
    #[error("'{program}' was cancelled")]
    Cancelled { program: String, tail: Vec<String> },

    /// Process could not be started at all
    #[error("Failed to spawn '{program}': {message}")]
    SpawnFailure { program: String, message: String },
}

impl ProcessError {
    /// Last captured output lines, if any
    pub fn tail(&self) -> &[String] {
        match self {
            Self::NonzeroExit { tail, .. }
            | Self::Timeout { tail, .. }
            | Self::Cancelled { tail, .. } => tail,
            Self::SpawnFailure { .. } => &[],
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Errors raised by the speech recognition stage
#[derive(Error, Debug)]
pub enum TranscriptionError {
    /// Engine executable or model is missing
    #[error("ASR engine not ready: {0}")]
    EngineNotReady(String),

    /// Engine output could not be decoded into segments
    #[error("Failed to decode ASR output: {0}")]
    DecodeError(String),

    /// Engine produced no usable speech segments
    #[error("No speech found in {0}")]
    EmptyAudio(String),

    /// Engine process failed
    #[error("ASR process error: {0}")]
    Process(#[from] ProcessError),
}

/// Errors while parsing timed-caption text
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormatError {
    /// Timecode line could not be parsed
    #[error("Malformed timecode at line {line}: '{content}'")]
    MalformedTimecode { line: usize, content: String },

    /// Block index did not increase
    #[error("Out-of-order index at line {line}: expected > {previous}, found {found}")]
    OutOfOrderIndex {
        line: usize,
        previous: usize,
        found: usize,
    },

    /// Block index line was not a number
    #[error("Malformed index at line {line}: '{content}'")]
    MalformedIndex { line: usize, content: String },

    /// Segment violates start/end/text invariants
    #[error("Invalid segment #{index}: {reason}")]
    InvalidSegment { index: usize, reason: String },
}

/// Errors from language model providers
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    /// Credential rejected
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Provider asked us to slow down
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    /// Response arrived but did not have the expected shape
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Timeout, connection reset, 5xx
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    /// Call aborted by cancellation
    #[error("Model call cancelled")]
    Cancelled,
}

impl ModelError {
    /// Whether another attempt of the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::TransientNetwork(_))
    }
}

/// Errors in the configuration file or command line overrides
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to read configuration {path}: {message}")]
    Load { path: PathBuf, message: String },
}

/// Main application error type that wraps all other errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Resource error: {0}")]
    Resource(#[from] ResourceFetchError),

    #[error("Download error: {0}")]
    Download(#[from] DownloadError),

    #[error("Transcription error: {0}")]
    Transcription(#[from] TranscriptionError),

    #[error("Subtitle format error: {0}")]
    Format(#[from] FormatError),

    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    #[error("Operation cancelled")]
    Cancelled,

    /// Error from a file operation
    #[error("File error: {0}")]
    File(String),

    /// Any other error
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl AppError {
    /// Process exit code for this error category
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            Self::Resource(_) => 3,
            Self::Download(DownloadError::Cancelled) => 8,
            Self::Download(DownloadError::Process(e)) if e.is_cancelled() => 8,
            Self::Download(_) => 4,
            Self::Transcription(TranscriptionError::Process(e)) if e.is_cancelled() => 8,
            Self::Transcription(_) => 5,
            Self::Format(_) => 6,
            Self::Process(e) if e.is_cancelled() => 8,
            Self::Process(_) => 7,
            Self::Cancelled => 8,
            Self::File(_) => 9,
            Self::Unknown(_) => 1,
        }
    }

    /// True when the run stopped because of cancellation, at any stage
    pub fn is_cancelled(&self) -> bool {
        self.exit_code() == 8
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        Self::Unknown(error.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        Self::File(error.to_string())
    }
}
