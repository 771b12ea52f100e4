//! Text normalization shared by the matcher and the resolution workflow.
//!
//! Catalog titles and export titles must go through exactly the same
//! normalization or exact-title matching silently stops working.

use once_cell::sync::Lazy;
use regex::Regex;

// ============================================================================
// REGEX PATTERNS
// ============================================================================

/// Anything that is not a letter, digit, underscore or whitespace.
/// Combining marks and joiners count as punctuation.
pub static PUNCTUATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\p{L}\p{N}_\s]").unwrap());

/// Runs of whitespace, collapsed to a single space.
pub static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Author separators: comma, ampersand, or a spaced "and".
/// "Anderson" and "Sandy" must survive, so "and" needs the surrounding spaces.
pub static AUTHOR_SEPARATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s*(?:,|&| and )\s*").unwrap());

// ============================================================================
// NORMALIZATION FUNCTIONS
// ============================================================================

/// Canonicalize free text: lowercase, `&` spelled out as "and", punctuation
/// replaced by spaces, whitespace collapsed and trimmed.
/// e.g., "Harry Potter & the Sorcerer's Stone" → "harry potter and the sorcerer s stone"
pub fn normalize_text(text: &str) -> String {
    let lowered = text.to_lowercase().replace('&', " and ");
    let cleaned = PUNCTUATION.replace_all(&lowered, " ");
    MULTI_SPACE.replace_all(&cleaned, " ").trim().to_string()
}

/// Normalize and split on whitespace. Empty input yields no tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    normalize_text(text)
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Tokens of every author in order, duplicates kept.
pub fn tokenize_authors<S: AsRef<str>>(authors: &[S]) -> Vec<String> {
    authors
        .iter()
        .flat_map(|author| tokenize(author.as_ref()))
        .collect()
}

/// Split a raw author credit into individual names.
/// "Neil Gaiman & Terry Pratchett" → ["Neil Gaiman", "Terry Pratchett"]
pub fn split_authors(raw: &str) -> Vec<String> {
    if raw.is_empty() {
        return Vec::new();
    }
    AUTHOR_SEPARATOR
        .split(raw)
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================
