/*!
 * Drift guard for corrected lines.
 *
 * A correction is expected to stay close to what was recognized. Short lines
 * get a loose threshold because fixing two words of five is a large relative
 * change; longer lines must stay closer.
 */

/// Lines with at most this many words use the loose threshold
const SHORT_LINE_WORDS: usize = 10;
const SHORT_LINE_THRESHOLD: f32 = 0.3;
const LONG_LINE_THRESHOLD: f32 = 0.7;

/// Normalized Levenshtein similarity (0.0-1.0) on lowercase text
pub fn similarity(a: &str, b: &str) -> f32 {
    let a_lower: Vec<char> = a.to_lowercase().chars().filter(|c| !c.is_ascii_punctuation()).collect();
    let b_lower: Vec<char> = b.to_lowercase().chars().filter(|c| !c.is_ascii_punctuation()).collect();
    if a_lower.is_empty() && b_lower.is_empty() {
        return 1.0;
    }
    if a_lower.is_empty() || b_lower.is_empty() {
        return 0.0;
    }

    let distance = levenshtein_distance(&a_lower, &b_lower);
    let max_len = a_lower.len().max(b_lower.len());
    1.0 - (distance as f32 / max_len as f32)
}

/// Scripts written without spaces between words
fn is_unspaced_script(c: char) -> bool {
    matches!(c,
        '\u{4e00}'..='\u{9fff}'   // CJK ideographs
        | '\u{3040}'..='\u{30ff}' // kana
        | '\u{ac00}'..='\u{d7af}' // hangul
        | '\u{0e00}'..='\u{0eff}' // thai, lao
        | '\u{1000}'..='\u{109f}' // myanmar
        | '\u{1780}'..='\u{17ff}' // khmer
        | '\u{0900}'..='\u{0dff}' // indic
    )
}

/// Words in `text`, where each character of an unspaced script counts as one
pub fn count_words(text: &str) -> usize {
    let unspaced = text.chars().filter(|c| is_unspaced_script(*c)).count();
    let spaced: String = text
        .chars()
        .map(|c| if is_unspaced_script(c) { ' ' } else { c })
        .collect();
    unspaced + spaced.split_whitespace().count()
}

/// Minimum similarity a correction of `original` must keep
pub fn threshold_for(original: &str) -> f32 {
    if count_words(original) <= SHORT_LINE_WORDS {
        SHORT_LINE_THRESHOLD
    } else {
        LONG_LINE_THRESHOLD
    }
}

/// Whether `corrected` stays close enough to `original`
pub fn is_acceptable(original: &str, corrected: &str) -> bool {
    similarity(original, corrected) >= threshold_for(original)
}

fn levenshtein_distance(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    // Two-row table
    let mut prev_row: Vec<usize> = (0..=b.len()).collect();
    let mut curr_row: Vec<usize> = vec![0; b.len() + 1];

    for i in 1..=a.len() {
        curr_row[0] = i;
        for j in 1..=b.len() {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            curr_row[j] = (prev_row[j] + 1)
                .min(curr_row[j - 1] + 1)
                .min(prev_row[j - 1] + cost);
        }
        std::mem::swap(&mut prev_row, &mut curr_row);
    }

    prev_row[b.len()]
}
