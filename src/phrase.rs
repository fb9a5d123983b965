//! Phrase normalization and matching for activation/deactivation detection.
//!
//! Recognizers insert punctuation and vary casing, so configured phrases are
//! matched against a normalized form: lowercased, punctuation stripped,
//! whitespace collapsed. "Ativar, por favor!" matches the phrase "ativar".

/// Strip punctuation and collapse whitespace so phrase matching is resilient
/// to recognizer formatting differences.
pub fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whether `text` contains `phrase` as a whole-word sequence.
///
/// Both sides are normalized before comparison. An empty phrase never
/// matches.
pub fn contains_phrase(text: &str, phrase: &str) -> bool {
    let phrase = normalize(phrase);
    if phrase.is_empty() {
        return false;
    }
    let text = normalize(text);
    if text == phrase {
        return true;
    }
    text.starts_with(&format!("{phrase} "))
        || text.ends_with(&format!(" {phrase}"))
        || text.contains(&format!(" {phrase} "))
}

/// Returns the first phrase from `phrases` contained in `text`, if any.
pub fn match_any<'a>(text: &str, phrases: &'a [String]) -> Option<&'a str> {
    phrases
        .iter()
        .find(|p| contains_phrase(text, p))
        .map(String::as_str)
}
