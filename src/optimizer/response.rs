/*!
 * Parsing of model replies into index-keyed corrections.
 *
 * The strict path accepts exactly one JSON object of string values. The
 * lenient path tolerates what models commonly wrap around it: code fences,
 * leading or trailing commentary, trailing commas, single quotes, or a plain
 * `N: text` list.
 */

use std::collections::BTreeMap;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::{Deserialize, Deserializer, MapAccess, Visitor};

/// Corrections keyed by document-global 1-based segment number
pub type Corrections = BTreeMap<usize, String>;

/// How a reply was understood
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedReply {
    Strict(Corrections),
    Repaired(Corrections),
}

impl ParsedReply {
    pub fn corrections(&self) -> &Corrections {
        match self {
            Self::Strict(c) | Self::Repaired(c) => c,
        }
    }

    pub fn is_repaired(&self) -> bool {
        matches!(self, Self::Repaired(_))
    }
}

/// Why a reply could not be turned into corrections
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyError {
    /// No key to text mapping could be recovered
    Unparseable,

    /// Several entries name the same line, e.g. `"1"` and `"01"`
    DuplicateKeys(Vec<usize>),
}

static CODE_FENCE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```[a-zA-Z]*\s*(.*?)```").unwrap());
static TRAILING_COMMA_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r",\s*([}\]])").unwrap());
static QUOTED_PAIR_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"["']?(\d+)["']?\s*:\s*(?:"((?:[^"\\]|\\.)*)"|'((?:[^'\\]|\\.)*)')"#).unwrap()
});
static LINE_ITEM_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(\d+)\s*[:.)]\s*(.*?)\s*$").unwrap());

/// JSON object entries in document order, repeated keys included
struct RawEntries(Vec<(String, String)>);

impl<'de> Deserialize<'de> for RawEntries {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = RawEntries;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object mapping line numbers to text")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<RawEntries, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry::<String, String>()? {
                    entries.push(entry);
                }
                Ok(RawEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

/// Parse a reply, strictly first and leniently second
pub fn parse_reply(text: &str) -> Result<ParsedReply, ReplyError> {
    match parse_strict(text) {
        Err(ReplyError::Unparseable) => parse_lenient(text).map(ParsedReply::Repaired),
        other => other.map(ParsedReply::Strict),
    }
}

/// Exactly one JSON object whose keys are numbers and values are strings
pub fn parse_strict(text: &str) -> Result<Corrections, ReplyError> {
    let RawEntries(entries) = serde_json::from_str(text.trim()).map_err(|_| ReplyError::Unparseable)?;
    let numbered = entries
        .into_iter()
        .map(|(k, v)| k.trim().parse::<usize>().ok().map(|k| (k, v)))
        .collect::<Option<Vec<_>>>()
        .ok_or(ReplyError::Unparseable)?;
    keyed(numbered)
}

/// Best-effort recovery of a key to text mapping
pub fn parse_lenient(text: &str) -> Result<Corrections, ReplyError> {
    let unfenced = CODE_FENCE_REGEX
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(text);

    if let Some(object) = outermost_object(unfenced) {
        let without_commas = TRAILING_COMMA_REGEX.replace_all(object, "$1");
        for attempt in [
            parse_strict(object),
            parse_strict(&without_commas),
            parse_quoted_pairs(&without_commas),
        ] {
            if attempt != Err(ReplyError::Unparseable) {
                return attempt;
            }
        }
    }

    parse_line_items(unfenced)
}

/// Collapse numbered entries, refusing any line number given twice
fn keyed(entries: Vec<(usize, String)>) -> Result<Corrections, ReplyError> {
    if entries.is_empty() {
        return Err(ReplyError::Unparseable);
    }
    let mut corrections = Corrections::new();
    let mut duplicates = Vec::new();
    for (key, value) in entries {
        if corrections.insert(key, value.trim().to_string()).is_some() && !duplicates.contains(&key) {
            duplicates.push(key);
        }
    }
    if duplicates.is_empty() {
        Ok(corrections)
    } else {
        duplicates.sort_unstable();
        Err(ReplyError::DuplicateKeys(duplicates))
    }
}

fn outermost_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// `"1": "a"` or `'1': 'a'` pairs, in any mixture of quote styles
fn parse_quoted_pairs(object: &str) -> Result<Corrections, ReplyError> {
    let mut found = Vec::new();
    for caps in QUOTED_PAIR_REGEX.captures_iter(object) {
        let Some(key) = caps.get(1).and_then(|k| k.as_str().parse::<usize>().ok()) else {
            continue;
        };
        let value = if let Some(double) = caps.get(2) {
            serde_json::from_str::<String>(&format!("\"{}\"", double.as_str()))
                .unwrap_or_else(|_| double.as_str().to_string())
        } else if let Some(single) = caps.get(3) {
            single.as_str().replace("\\'", "'").replace("\\\"", "\"")
        } else {
            continue;
        };
        found.push((key, value));
    }
    keyed(found)
}

/// `1: text` lines, also `1. text` and `1) text`
fn parse_line_items(text: &str) -> Result<Corrections, ReplyError> {
    let mut found = Vec::new();
    for line in text.lines() {
        if let Some(caps) = LINE_ITEM_REGEX.captures(line) {
            if let Ok(key) = caps[1].parse::<usize>() {
                found.push((key, caps[2].trim().trim_matches('"').to_string()));
            }
        }
    }
    keyed(found)
}
