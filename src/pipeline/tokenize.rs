//! Candidate code tokens and keyword-centred text windows.
//!
//! Part codes in datasheets look like `G5V-1-DC12`, `LM317T/NOPB` or
//! `6ES7 214-1AG40`. The tokenizer deliberately over-generates: anything that
//! *could* be a code survives, and the resolver narrows the set later. Only a
//! denylist of words that are never codes is removed here.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

/// Near-key phrases that usually sit next to a part code.
pub const NEAR_KEYWORDS: &[&str] = &[
    "part no",
    "part number",
    "part #",
    "p/n",
    "model",
    "type",
    "ordering information",
    "ordering code",
    "order code",
    "order no",
    "catalog no",
    "catalogue no",
    "cat. no",
    "article no",
    "sku",
    "品番",
    "型番",
    "型式",
];

/// Generic words and units that match the token shape but are never codes.
const BAD_TOKENS: &[&str] = &[
    "PAGE", "PAGES", "TABLE", "FIGURE", "PDF", "HTTP", "HTTPS", "WWW.", "NOTE", "NOTES",
    "DATE", "TYPE", "TYPES", "MODEL", "MODELS", "SERIES", "CATALOG", "ORDERING", "ORDER",
    "INFORMATION", "PART", "PARTS", "NUMBER", "CODE", "DATASHEET", "SPECIFICATIONS",
    "SPECIFICATION", "DIMENSIONS", "WEIGHT", "VOLTAGE", "CURRENT", "POWER", "OUTPUT",
    "INPUT", "RATED", "TOTAL", "STANDARD", "OPTION", "OPTIONS", "UNIT", "UNITS", "INCH",
    "INCHES", "WATT", "WATTS", "AMPS", "VOLT", "VOLTS", "OHMS", "HERTZ", "TEMP", "WITH",
    "FROM", "THIS", "THAT", "THE", "AND", "FOR", "NONE", "YES", "TYP.", "MAX.", "MIN.",
    "REV.", "VERSION", "COPYRIGHT", "RESERVED", "RIGHTS", "DESCRIPTION",
];

static RE_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Z0-9][A-Z0-9._/\-]{3,23}").unwrap());

static BAD_TOKEN_SET: Lazy<HashSet<&'static str>> =
    Lazy::new(|| BAD_TOKENS.iter().copied().collect());

static RE_KEYWORDS: Lazy<Vec<Regex>> = Lazy::new(|| {
    NEAR_KEYWORDS
        .iter()
        .map(|k| Regex::new(&format!("(?i){}", regex::escape(k))).unwrap())
        .collect()
});

fn is_bad_token(token: &str) -> bool {
    BAD_TOKEN_SET.contains(token)
}

/// Trim everything that is not an ASCII letter or digit from both ends.
pub fn strip_code_edges(token: &str) -> &str {
    token.trim_matches(|c: char| !c.is_ascii_alphanumeric())
}

/// Extract candidate code tokens from `text`.
///
/// Returns a deduplicated set in first-seen order.
pub fn tokenize(text: &str) -> Vec<String> {
    let upper = text.to_uppercase();
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for m in RE_TOKEN.find_iter(&upper) {
        let token = strip_code_edges(m.as_str());
        if token.len() < 4 || is_bad_token(token) {
            continue;
        }
        if seen.insert(token.to_string()) {
            out.push(token.to_string());
        }
    }
    out
}

/// Byte index `n` chars before `idx` (or 0).
fn back_chars(text: &str, idx: usize, n: usize) -> usize {
    if n == 0 {
        return idx;
    }
    text[..idx]
        .char_indices()
        .rev()
        .nth(n - 1)
        .map(|(i, _)| i)
        .unwrap_or(0)
}

/// Byte index `n` chars after `idx` (or the end of `text`).
fn forward_chars(text: &str, idx: usize, n: usize) -> usize {
    text[idx..]
        .char_indices()
        .nth(n)
        .map(|(i, _)| idx + i)
        .unwrap_or(text.len())
}

/// Text windows of `window_size` characters around every near-key keyword.
///
/// Keywords are processed in [`NEAR_KEYWORDS`] order; windows may overlap
/// and repeat.
pub fn keyword_windows(text: &str, window_size: usize) -> Vec<String> {
    let mut windows = Vec::new();
    for re in RE_KEYWORDS.iter() {
        for m in re.find_iter(text) {
            let start = back_chars(text, m.start(), window_size);
            let end = forward_chars(text, m.end(), window_size);
            windows.push(text[start..end].to_string());
        }
    }
    windows
}
