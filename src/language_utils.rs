//! Language utilities for ISO language code handling
//!
//! The ASR engine reports languages as ISO 639-1 codes most of the time, but
//! hints typed by users and tags from other tools may be 639-2 (T or B) codes
//! or English names. Everything is normalized to the shortest ISO code.

use isolang::Language;

/// Map ISO 639-2/B bibliographic codes to their 639-2/T equivalent
fn bibliographic_to_terminology(code: &str) -> &str {
    match code {
        "fre" => "fra",
        "ger" => "deu",
        "dut" => "nld",
        "gre" => "ell",
        "chi" => "zho",
        "cze" => "ces",
        "ice" => "isl",
        "alb" => "sqi",
        "arm" => "hye",
        "baq" => "eus",
        "bur" => "mya",
        "per" => "fas",
        "geo" => "kat",
        "may" => "msa",
        "mac" => "mkd",
        "rum" => "ron",
        "slo" => "slk",
        "wel" => "cym",
        other => other,
    }
}

fn lookup(code: &str) -> Option<Language> {
    let normalized = code.trim().to_lowercase();
    match normalized.len() {
        0 | 1 => None,
        2 => Language::from_639_1(&normalized),
        3 => Language::from_639_3(bibliographic_to_terminology(&normalized)),
        _ => {
            // English names such as "english" or "Portuguese"
            let mut chars = normalized.chars();
            let capitalized: String = match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => return None,
            };
            Language::from_name(&capitalized)
        }
    }
}

/// Check if a language code or English name is known
pub fn is_valid_language(code: &str) -> bool {
    lookup(code).is_some()
}

/// Normalize to ISO 639-1 when one exists, else ISO 639-3
pub fn normalize_language_tag(code: &str) -> Option<String> {
    let language = lookup(code)?;
    Some(
        language
            .to_639_1()
            .map(str::to_string)
            .unwrap_or_else(|| language.to_639_3().to_string()),
    )
}

/// English display name for a language code
pub fn get_language_name(code: &str) -> Option<String> {
    lookup(code).map(|l| l.to_name().to_string())
}

/// Check whether two codes refer to the same language
pub fn language_codes_match(code1: &str, code2: &str) -> bool {
    match (lookup(code1), lookup(code2)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}
