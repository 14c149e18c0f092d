use std::fmt;
use std::path::Path;

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::errors::FormatError;

// @module: Timed caption model and serialization

/// Allowed overlap between a segment's end and the next segment's start
pub const OVERLAP_EPSILON_MS: u64 = 50;

// @const: SRT timecode line, tolerant of '.' separators and short hours
static TIMECODE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d+):(\d{2}):(\d{2})[,.](\d{3})\s*-->\s*(\d+):(\d{2}):(\d{2})[,.](\d{3})\s*$").unwrap()
});

// @struct: Single timed caption unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    // @field: Start offset in ms
    pub start_ms: u64,

    // @field: End offset in ms
    pub end_ms: u64,

    // @field: Caption text, may span lines
    pub text: String,
}

impl Segment {
    pub fn new(start_ms: u64, end_ms: u64, text: impl Into<String>) -> Self {
        Self {
            start_ms,
            end_ms,
            text: text.into(),
        }
    }

    /// Copy of this segment with replaced text and identical timing.
    ///
    /// The text is cleaned with `clean_text`, so blank lines never end up
    /// inside a cue.
    pub fn with_text(&self, text: impl AsRef<str>) -> Self {
        Self {
            start_ms: self.start_ms,
            end_ms: self.end_ms,
            text: Self::clean_text(text.as_ref()),
        }
    }

    /// Trim every line and drop the blank ones
    pub fn clean_text(text: &str) -> String {
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }

    // @validates: Time range and non-empty text
    fn validate(&self, index: usize) -> Result<(), FormatError> {
        if self.end_ms <= self.start_ms {
            return Err(FormatError::InvalidSegment {
                index,
                reason: format!("end {} <= start {}", self.end_ms, self.start_ms),
            });
        }
        if self.text.trim().is_empty() {
            return Err(FormatError::InvalidSegment {
                index,
                reason: "empty text".to_string(),
            });
        }
        Ok(())
    }

    /// Format a timestamp in milliseconds to SRT format (HH:MM:SS,mmm)
    pub fn format_timestamp(ms: u64) -> String {
        let hours = ms / 3_600_000;
        let minutes = (ms % 3_600_000) / 60_000;
        let seconds = (ms % 60_000) / 1_000;
        let millis = ms % 1_000;

        format!("{:02}:{:02}:{:02},{:03}", hours, minutes, seconds, millis)
    }
}

/// Output encodings supported when writing a document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Srt,
    Txt,
    Json,
}

impl OutputFormat {
    /// Pick the format from a file extension, SRT when unknown
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("txt") => Self::Txt,
            Some("json") => Self::Json,
            _ => Self::Srt,
        }
    }
}

/// Ordered segments plus optional language tag and steering context.
///
/// Documents are immutable once built: every transformation returns a new
/// value, so chunks of one document can be processed in parallel.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SubtitleDocument {
    segments: Vec<Segment>,
    language: Option<String>,
    context: Option<String>,
}

impl SubtitleDocument {
    /// Build a document, enforcing ordering, timing and text invariants.
    ///
    /// Segments are stably sorted by start before checks run. Overlap with
    /// the next segment is tolerated up to [`OVERLAP_EPSILON_MS`].
    pub fn from_segments(mut segments: Vec<Segment>) -> Result<Self, FormatError> {
        segments.sort_by_key(|s| s.start_ms);
        for (i, segment) in segments.iter().enumerate() {
            segment.validate(i + 1)?;
        }
        for (i, pair) in segments.windows(2).enumerate() {
            if pair[0].end_ms > pair[1].start_ms + OVERLAP_EPSILON_MS {
                return Err(FormatError::InvalidSegment {
                    index: i + 1,
                    reason: format!(
                        "ends at {} but next segment starts at {}",
                        pair[0].end_ms, pair[1].start_ms
                    ),
                });
            }
        }
        Ok(Self {
            segments,
            language: None,
            context: None,
        })
    }

    /// Build a document from raw engine output, repairing instead of failing.
    ///
    /// Empty and zero-duration segments are dropped, text is trimmed, and an
    /// end that runs past the next start is clamped to it.
    pub fn from_raw_segments(raw: Vec<Segment>) -> Self {
        let before = raw.len();
        let mut segments: Vec<Segment> = raw
            .into_iter()
            .map(|s| Segment::new(s.start_ms, s.end_ms, s.text.trim()))
            .filter(|s| s.end_ms > s.start_ms && !s.text.is_empty())
            .collect();
        segments.sort_by_key(|s| s.start_ms);

        for i in 1..segments.len() {
            let next_start = segments[i].start_ms;
            let prev = &mut segments[i - 1];
            if prev.end_ms > next_start + OVERLAP_EPSILON_MS {
                prev.end_ms = next_start;
            }
        }
        // Clamping can collapse a segment that shares its start with the next
        segments.retain(|s| s.end_ms > s.start_ms);

        if segments.len() != before {
            debug!("Dropped {} unusable segments", before - segments.len());
        }
        Self {
            segments,
            language: None,
            context: None,
        }
    }

    /// Same language and context, new segment sequence of equal length
    pub(crate) fn with_segments(&self, segments: Vec<Segment>) -> Self {
        Self {
            segments,
            language: self.language.clone(),
            context: self.context.clone(),
        }
    }

    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.language = language;
        self
    }

    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.context = context.filter(|c| !c.trim().is_empty());
        self
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Parse SRT text.
    ///
    /// Indices must strictly increase. CRLF line endings, a leading BOM and
    /// repeated blank lines are accepted. Any malformed block is an error.
    pub fn parse_srt(input: &str) -> Result<Self, FormatError> {
        Self::from_segments(parse_srt_blocks(input)?)
    }

    /// Serialize as SRT with indices renumbered from 1
    pub fn to_srt(&self) -> String {
        self.to_string()
    }

    /// One caption per line, multi-line captions flattened with spaces
    pub fn to_txt(&self) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            out.push_str(&segment.text.replace('\n', " "));
            out.push('\n');
        }
        out
    }

    /// JSON object keyed by 1-based index with ms timings
    pub fn to_json(&self) -> String {
        let mut map = Map::new();
        for (i, segment) in self.segments.iter().enumerate() {
            map.insert(
                (i + 1).to_string(),
                json!({
                    "start_time": segment.start_ms,
                    "end_time": segment.end_ms,
                    "text": segment.text,
                }),
            );
        }
        format!("{:#}", Value::Object(map))
    }

    pub fn render(&self, format: OutputFormat) -> String {
        match format {
            OutputFormat::Srt => self.to_srt(),
            OutputFormat::Txt => self.to_txt(),
            OutputFormat::Json => self.to_json(),
        }
    }
}

/// Split SRT text into segments without checking document invariants.
///
/// Block structure is still strict: every block needs an index greater than
/// the previous one and a valid timecode line. Engine output goes through
/// here and is then repaired by `SubtitleDocument::from_raw_segments`.
pub fn parse_srt_blocks(input: &str) -> Result<Vec<Segment>, FormatError> {
    let normalized = input.trim_start_matches('\u{feff}').replace("\r\n", "\n");
    let lines: Vec<&str> = normalized.lines().collect();

    let mut segments = Vec::new();
    let mut previous_index: Option<usize> = None;
    let mut i = 0;

    while i < lines.len() {
        if lines[i].trim().is_empty() {
            i += 1;
            continue;
        }

        let raw_index = lines[i].trim();
        let index: usize = raw_index.parse().map_err(|_| FormatError::MalformedIndex {
            line: i + 1,
            content: raw_index.to_string(),
        })?;
        if let Some(previous) = previous_index {
            if index <= previous {
                return Err(FormatError::OutOfOrderIndex {
                    line: i + 1,
                    previous,
                    found: index,
                });
            }
        }
        previous_index = Some(index);
        i += 1;

        let timecode = lines.get(i).map(|l| l.trim()).unwrap_or_default();
        let (start_ms, end_ms) =
            parse_timecode_line(timecode).ok_or_else(|| FormatError::MalformedTimecode {
                line: i + 1,
                content: timecode.to_string(),
            })?;
        i += 1;

        let mut text_lines = Vec::new();
        while i < lines.len() && !lines[i].trim().is_empty() {
            text_lines.push(lines[i].trim());
            i += 1;
        }

        segments.push(Segment::new(start_ms, end_ms, text_lines.join("\n")));
    }

    Ok(segments)
}

impl fmt::Display for SubtitleDocument {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            writeln!(f, "{}", i + 1)?;
            writeln!(
                f,
                "{} --> {}",
                Segment::format_timestamp(segment.start_ms),
                Segment::format_timestamp(segment.end_ms)
            )?;
            writeln!(f, "{}", segment.text)?;
        }
        Ok(())
    }
}

fn parse_timecode_line(line: &str) -> Option<(u64, u64)> {
    let caps = TIMECODE_REGEX.captures(line)?;
    let start = timestamp_from_captures(&caps, 1)?;
    let end = timestamp_from_captures(&caps, 5)?;
    Some((start, end))
}

fn timestamp_from_captures(caps: &regex::Captures, start_idx: usize) -> Option<u64> {
    let part = |offset: usize| -> Option<u64> { caps.get(start_idx + offset)?.as_str().parse().ok() };
    let (hours, minutes, seconds, millis) = (part(0)?, part(1)?, part(2)?, part(3)?);
    if minutes >= 60 || seconds >= 60 {
        return None;
    }
    hours
        .checked_mul(3_600_000)?
        .checked_add(minutes * 60_000 + seconds * 1_000 + millis)
}
