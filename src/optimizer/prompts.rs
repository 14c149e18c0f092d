/*!
 * Prompt rendering for transcript correction.
 *
 * Segments are sent as a JSON object keyed by their document-global 1-based
 * number, so the reply can be mapped back to segments by key alone.
 */

use std::collections::{BTreeMap, HashMap};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::chunker::Chunk;

pub const INPUT_OPEN: &str = "<input_subtitle>";
pub const INPUT_CLOSE: &str = "</input_subtitle>";
pub const REFERENCE_OPEN: &str = "<reference>";
pub const REFERENCE_CLOSE: &str = "</reference>";

static INPUT_BLOCK_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<input_subtitle>(.*?)</input_subtitle>").unwrap());

/// Key numbers a reply for `chunk` must contain, in order
pub fn expected_keys(chunk: &Chunk) -> Vec<usize> {
    (chunk.first_segment + 1..=chunk.first_segment + chunk.len()).collect()
}

/// JSON object of the chunk's lines in numeric key order
pub fn render_numbered_json(chunk: &Chunk) -> String {
    let entries: Vec<String> = expected_keys(chunk)
        .into_iter()
        .zip(chunk.segments.iter())
        .map(|(key, segment)| {
            let value = serde_json::Value::String(segment.text.replace('\n', " "));
            format!("  \"{}\": {}", key, value)
        })
        .collect();
    format!("{{\n{}\n}}", entries.join(",\n"))
}

/// First user message for a chunk
pub fn build_user_prompt(chunk: &Chunk, context: Option<&str>) -> String {
    let mut prompt = format!(
        "Correct the following subtitles. Keep the original language, do not translate. \
         Remove disfluencies without altering meaning and return exactly {} entries with the same keys.\n\
         {}\n{}\n{}",
        chunk.len(),
        INPUT_OPEN,
        render_numbered_json(chunk),
        INPUT_CLOSE
    );
    if let Some(context) = context.map(str::trim).filter(|c| !c.is_empty()) {
        prompt.push_str(&format!(
            "\nReference content (use this surrounding text to resolve ambiguous terms):\n{}\n{}\n{}",
            REFERENCE_OPEN, context, REFERENCE_CLOSE
        ));
    }
    prompt
}

/// Follow-up message after a reply failed validation
pub fn build_feedback_prompt(problem: &str, expected: &[usize]) -> String {
    let keys: Vec<String> = expected.iter().map(|k| format!("\"{}\"", k)).collect();
    format!(
        "Validation failed: {}\nThe reply must contain exactly these keys: {}.\n\
         Please fix the errors and output ONLY a valid JSON dictionary.",
        problem,
        keys.join(", ")
    )
}

/// Lines of the input block in numeric key order, for fakes that echo it
pub fn extract_input_lines(prompt: &str) -> Option<BTreeMap<usize, String>> {
    let block = INPUT_BLOCK_REGEX.captures(prompt)?.get(1)?.as_str();
    let parsed: HashMap<String, String> = serde_json::from_str(block.trim()).ok()?;
    parsed
        .into_iter()
        .map(|(k, v)| k.trim().parse::<usize>().ok().map(|k| (k, v)))
        .collect()
}
