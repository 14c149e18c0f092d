/*!
 * Speech recognition stage.
 *
 * `SpeechRecognizer` is the seam between the pipeline and a concrete
 * engine. The only engine shipped is the faster-whisper command line tool;
 * tests substitute their own recognizers.
 */

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::app_config::Device;
use crate::cancel::CancellationToken;
use crate::errors::TranscriptionError;
use crate::subtitle::SubtitleDocument;

pub mod faster_whisper;

pub use faster_whisper::FasterWhisper;

/// Receives engine progress as a percentage (0-100)
pub type ProgressCallback = Arc<dyn Fn(u8) + Send + Sync>;

#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Short engine name for logs
    fn name(&self) -> &str;

    /// Transcribe `audio` into a document.
    ///
    /// With no `language_hint` the engine detects the language and the
    /// detected tag is set on the returned document.
    async fn transcribe(
        &self,
        audio: &Path,
        device: Device,
        language_hint: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<SubtitleDocument, TranscriptionError>;
}
