use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// @module: File and directory utilities

/// Extensions of containers that carry an audio track
const AUDIO_EXTENSIONS: &[&str] = &["wav", "mp3", "m4a", "aac", "flac", "ogg", "opus", "wma"];
const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "avi", "mov", "wmv", "flv", "webm", "m4v", "mpg", "mpeg", "ogv", "ts", "mts", "m2ts",
];

/// Kind of media a path points at, judged by extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
    Subtitle,
    Unknown,
}

impl MediaKind {
    /// Audio and video containers can both feed the ASR engine
    pub fn is_transcribable(&self) -> bool {
        matches!(self, Self::Audio | Self::Video)
    }
}

// @struct: File operations utility
pub struct FileManager;

impl FileManager {
    // @checks: File existence
    pub fn file_exists<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref().is_file()
    }

    // @creates: Directory and parents if needed
    pub fn ensure_dir<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        if !path.exists() {
            fs::create_dir_all(path)
                .with_context(|| format!("Failed to create directory: {:?}", path))?;
        }
        Ok(())
    }

    /// Output path `<output_dir>/<input stem>.<extension>`
    pub fn generate_output_path<P1: AsRef<Path>, P2: AsRef<Path>>(
        input_file: P1,
        output_dir: P2,
        extension: &str,
    ) -> PathBuf {
        let stem = input_file.as_ref().file_stem().unwrap_or_default();
        let mut output_filename = stem.to_string_lossy().to_string();
        output_filename.push('.');
        output_filename.push_str(extension.trim_start_matches('.'));
        output_dir.as_ref().join(output_filename)
    }

    /// Find all transcribable media files under a directory, sorted by path
    pub fn find_media_files<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>> {
        let mut result = Vec::new();
        for entry in WalkDir::new(dir.as_ref()).follow_links(true) {
            let entry = entry.context("Failed to read directory entry")?;
            let path = entry.path();
            if path.is_file() && Self::media_kind(path).is_transcribable() {
                result.push(path.to_path_buf());
            }
        }
        result.sort();
        Ok(result)
    }

    /// Read a file to a string
    pub fn read_to_string<P: AsRef<Path>>(path: P) -> Result<String> {
        fs::read_to_string(&path).with_context(|| format!("Failed to read file: {:?}", path.as_ref()))
    }

    /// Write a string to a file through a sibling temp file, so readers never
    /// observe a half-written document
    pub fn write_to_file<P: AsRef<Path>>(path: P, content: &str) -> Result<()> {
        let path = path.as_ref();
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Self::ensure_dir(&parent)?;

        let mut temp = tempfile::NamedTempFile::new_in(&parent)
            .with_context(|| format!("Failed to create temp file in {:?}", parent))?;
        temp.write_all(content.as_bytes())
            .with_context(|| format!("Failed to write to file: {:?}", path))?;
        temp.persist(path)
            .with_context(|| format!("Failed to move output into place: {:?}", path))?;
        Ok(())
    }

    /// Classify a path by its extension
    pub fn media_kind<P: AsRef<Path>>(path: P) -> MediaKind {
        let Some(ext) = path.as_ref().extension() else {
            return MediaKind::Unknown;
        };
        let ext = ext.to_string_lossy().to_lowercase();
        if ext == "srt" {
            MediaKind::Subtitle
        } else if AUDIO_EXTENSIONS.contains(&ext.as_str()) {
            MediaKind::Audio
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            MediaKind::Video
        } else {
            MediaKind::Unknown
        }
    }
}
