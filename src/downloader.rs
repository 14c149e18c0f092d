/*!
 * Source resolution: URL or local path to a local audio file.
 *
 * URLs are handed to yt-dlp, which extracts only the audio stream into a
 * temporary directory. That directory belongs to the returned `AudioAsset`
 * and disappears with it, on success, failure or cancellation alike.
 */

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info, warn};
use tempfile::TempDir;
use url::Url;

use crate::app_config::DownloadConfig;
use crate::cancel::CancellationToken;
use crate::errors::{DownloadError, ProcessError};
use crate::file_utils::{FileManager, MediaKind};
use crate::process_runner::{self, ProcessSpec};

/// Output template inside the temporary directory
const AUDIO_TEMPLATE: &str = "audio.%(ext)s";

const NO_AUDIO_MARKERS: &[&str] = &[
    "requested format is not available",
    "no audio",
    "does not contain any audio",
    "no video formats found",
];

const NETWORK_MARKERS: &[&str] = &[
    "unable to download",
    "network is unreachable",
    "connection",
    "timed out",
    "name resolution",
    "temporary failure",
    "http error 5",
    "ssl",
];

/// Where the audio comes from
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    Url(Url),
    Local(PathBuf),
}

impl Source {
    /// Classify a user-supplied source reference
    pub fn parse(reference: &str) -> Result<Self, DownloadError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(DownloadError::UnsupportedSource("empty source".to_string()));
        }
        match Url::parse(reference) {
            // Single-letter schemes are Windows drive letters
            Ok(url) if url.scheme().len() > 1 => match url.scheme() {
                "http" | "https" => Ok(Self::Url(url)),
                "file" => url
                    .to_file_path()
                    .map(Self::Local)
                    .map_err(|_| DownloadError::UnsupportedSource(reference.to_string())),
                other => Err(DownloadError::UnsupportedSource(format!(
                    "{} (scheme '{}' is not supported)",
                    reference, other
                ))),
            },
            _ => Ok(Self::Local(PathBuf::from(reference))),
        }
    }
}

/// A local audio file, possibly living in a temporary directory
#[derive(Debug)]
pub struct AudioAsset {
    path: PathBuf,
    // Dropping this removes the downloaded file
    _temp: Option<TempDir>,
}

impl AudioAsset {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _temp: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the file is removed when the asset is dropped
    pub fn is_temporary(&self) -> bool {
        self._temp.is_some()
    }
}

/// Resolves sources with yt-dlp and ffprobe
#[derive(Debug, Clone)]
pub struct Downloader {
    config: DownloadConfig,
}

impl Downloader {
    pub fn new(config: DownloadConfig) -> Self {
        Self { config }
    }

    pub async fn resolve(&self, source: &str, cancel: &CancellationToken) -> Result<AudioAsset, DownloadError> {
        match Source::parse(source)? {
            Source::Url(url) => self.download(&url, cancel).await,
            Source::Local(path) => self.check_local(&path, cancel).await,
        }
    }

    async fn download(&self, url: &Url, cancel: &CancellationToken) -> Result<AudioAsset, DownloadError> {
        let temp = tempfile::Builder::new()
            .prefix("videoscribe-dl-")
            .tempdir()
            .map_err(|e| DownloadError::Process(ProcessError::SpawnFailure {
                program: self.config.ytdlp_path.clone(),
                message: format!("cannot create download directory: {}", e),
            }))?;

        let spec = ProcessSpec::new(&self.config.ytdlp_path)
            .args(["--no-playlist", "--no-part", "-f", "bestaudio/best", "-x", "--audio-format", "wav", "-o"])
            .arg(temp.path().join(AUDIO_TEMPLATE))
            .arg(url.as_str())
            .timeout(Duration::from_secs(self.config.timeout_secs));

        info!("Downloading audio from {}", url);
        let result = process_runner::run(&spec, |_, line| debug!("yt-dlp: {}", line), cancel).await;

        match result {
            Ok(_) => {}
            Err(ProcessError::Cancelled { .. }) => return Err(DownloadError::Cancelled),
            Err(ProcessError::NonzeroExit { code, tail, .. }) => {
                return Err(classify_failure(url.as_str(), code, &tail));
            }
            Err(e) => return Err(e.into()),
        }

        let path = find_audio_file(temp.path()).ok_or_else(|| DownloadError::NoAudioStream(url.to_string()))?;
        info!("Downloaded audio to {:?}", path);
        Ok(AudioAsset {
            path,
            _temp: Some(temp),
        })
    }

    async fn check_local(&self, path: &Path, cancel: &CancellationToken) -> Result<AudioAsset, DownloadError> {
        if !FileManager::file_exists(path) {
            return Err(DownloadError::UnsupportedSource(format!("{} does not exist", path.display())));
        }
        match FileManager::media_kind(path) {
            MediaKind::Subtitle => {
                return Err(DownloadError::UnsupportedSource(format!(
                    "{} is already a subtitle file; use the optimize command",
                    path.display()
                )));
            }
            kind if !kind.is_transcribable() => {
                return Err(DownloadError::UnsupportedSource(format!(
                    "{} is not an audio or video file",
                    path.display()
                )));
            }
            _ => {}
        }

        if self.config.probe_local_files {
            match which::which(&self.config.ffprobe_path) {
                Ok(ffprobe) => self.probe_audio(&ffprobe, path, cancel).await?,
                Err(_) => debug!("ffprobe not found, skipping audio stream check"),
            }
        }
        Ok(AudioAsset::local(path))
    }

    /// Fail unless ffprobe reports at least one audio stream
    async fn probe_audio(&self, ffprobe: &Path, path: &Path, cancel: &CancellationToken) -> Result<(), DownloadError> {
        let spec = ProcessSpec::new(ffprobe)
            .args(["-v", "error", "-select_streams", "a", "-show_entries", "stream=codec_type", "-of", "csv=p=0"])
            .arg(path)
            .timeout(Duration::from_secs(60));

        match process_runner::run_capture(&spec, cancel).await {
            Ok(stdout) if stdout.lines().any(|l| l.trim() == "audio") => Ok(()),
            Ok(_) => Err(DownloadError::NoAudioStream(path.display().to_string())),
            Err(ProcessError::Cancelled { .. }) => Err(DownloadError::Cancelled),
            Err(ProcessError::NonzeroExit { tail, .. }) => {
                warn!("ffprobe could not read {:?}: {}", path, tail.join(" | "));
                Err(DownloadError::UnsupportedSource(format!("{} cannot be decoded", path.display())))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Map a failed yt-dlp run to a download error category
pub fn classify_failure(source: &str, code: Option<i32>, tail: &[String]) -> DownloadError {
    let text = tail.join("\n").to_lowercase();
    if NO_AUDIO_MARKERS.iter().any(|m| text.contains(m)) {
        return DownloadError::NoAudioStream(source.to_string());
    }
    if NETWORK_MARKERS.iter().any(|m| text.contains(m)) {
        let reason = tail
            .iter()
            .rev()
            .find(|l| l.to_lowercase().contains("error"))
            .or(tail.last())
            .cloned()
            .unwrap_or_default();
        return DownloadError::NetworkFailure(reason);
    }
    DownloadError::ToolExitNonzero {
        code,
        tail: tail.join("\n"),
    }
}

fn find_audio_file(dir: &Path) -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.file_stem().is_some_and(|s| s == "audio"))
        .collect();
    candidates.sort();
    // Prefer the extracted wav over any leftover original container
    candidates
        .iter()
        .find(|p| p.extension().is_some_and(|e| e == "wav"))
        .or(candidates.first())
        .cloned()
}
