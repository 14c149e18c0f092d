/*!
 * # videoscribe
 *
 * Turns a video reference (URL or local file) into a cleaned-up, timed
 * transcript.
 *
 * ## Features
 *
 * - Audio-only download through yt-dlp, or local media files
 * - Speech recognition with the faster-whisper command line engine
 * - Engine and model provisioning into a shared, lock-protected cache
 * - Transcript correction using language model providers:
 *   - OpenAI-compatible APIs
 *   - Anthropic API
 *   - Ollama (local LLM)
 * - Original timestamps preserved exactly; chunks that cannot be corrected
 *   keep their recognized text and are flagged
 * - SRT, plain text and JSON output
 *
 * ## Architecture
 *
 * The library is organized in these main modules:
 * - `pipeline`: End-to-end orchestration and run reports
 * - `resources`: Engine/model provisioning (`ResourceProvisioner`)
 * - `downloader`: Source resolution to a local audio file
 * - `process_runner`: Supervised external processes
 * - `asr`: Speech recognition (`SpeechRecognizer`, faster-whisper)
 * - `chunker`: Budgeted grouping of segments for model calls
 * - `optimizer`: Prompting, reply parsing and repair, merge
 *   - `optimizer::prompts`: Numbered JSON prompts
 *   - `optimizer::response`: Strict and lenient reply parsing
 *   - `optimizer::similarity`: Drift guard for corrected lines
 * - `providers`: Client implementations for various LLM providers:
 *   - `providers::openai`: OpenAI-compatible API client
 *   - `providers::anthropic`: Anthropic API client
 *   - `providers::ollama`: Ollama API client
 *   - `providers::mock`: Instrumented provider for tests
 * - `subtitle`: Segment and document model, SRT/TXT/JSON serialization
 * - `retry`, `cancel`: Shared retry policy and cancellation token
 * - `app_config`, `errors`, `file_utils`, `language_utils`: Support code
 */

// Global lints configuration
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::redundant_closure_for_method_calls)]

pub mod app_config;
pub mod asr;
pub mod cancel;
pub mod chunker;
pub mod downloader;
pub mod errors;
pub mod file_utils;
pub mod language_utils;
pub mod optimizer;
pub mod pipeline;
pub mod process_runner;
pub mod providers;
pub mod resources;
pub mod retry;
pub mod subtitle;

// Re-export main types for easier usage
pub use app_config::Config;
pub use cancel::CancellationToken;
pub use errors::{AppError, DownloadError, FormatError, ModelError, ProcessError, ResourceFetchError, TranscriptionError};
pub use pipeline::{Pipeline, PipelineReport, PipelineRequest};
pub use subtitle::{Segment, SubtitleDocument};
