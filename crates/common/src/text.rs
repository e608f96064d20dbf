//! Tokenization shared by the keyword ranker and the hashing embedder

use regex_lite::Regex;
use std::sync::OnceLock;

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[A-Za-z0-9']+").expect("valid token pattern"))
}

/// Split text into lowercase terms.
///
/// A term is a maximal run of ASCII letters, digits and apostrophes; anything
/// else (whitespace, punctuation, non-ASCII) delimits.
pub fn tokenize(text: &str) -> Vec<String> {
    token_pattern()
        .find_iter(text)
        .map(|m| m.as_str().to_ascii_lowercase())
        .collect()
}
