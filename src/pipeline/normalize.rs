//! Unicode-aware normalisation shared by the table normalizer and variant
//! inference.
//!
//! All comparisons between header labels, aliases and keys go through these
//! functions so full-width forms (`Ｔｙｐｅ`), ligatures and case differences
//! collapse to a single spelling before matching.

use unicode_normalization::UnicodeNormalization;

/// Dash-like code points unified to ASCII `-` in observed values.
const DASHES: &[char] = &[
    '\u{2010}', '\u{2011}', '\u{2012}', '\u{2013}', '\u{2014}', '\u{2015}', '\u{2212}',
    '\u{FE58}', '\u{FE63}', '\u{FF0D}',
];

fn collapse_non_alnum(input: &str, sep: char) -> String {
    let lowered: String = input.nfkc().collect::<String>().to_lowercase();
    let mut out = String::with_capacity(lowered.len());
    let mut pending = false;
    for c in lowered.chars() {
        if c.is_alphanumeric() {
            if pending && !out.is_empty() {
                out.push(sep);
            }
            pending = false;
            out.push(c);
        } else {
            pending = true;
        }
    }
    out
}

/// Key form: NFKC, lowercase, non-alphanumeric runs → `_`, trimmed.
///
/// `"Type No."` → `"type_no"`.
pub fn normalize_key(input: &str) -> String {
    collapse_non_alnum(input, '_')
}

/// Alias form: NFKC, lowercase, non-alphanumeric runs → single space, trimmed.
pub fn normalize_alias(input: &str) -> String {
    collapse_non_alnum(input, ' ')
}

/// Slug used to match recipe brand/series, and to name batch output paths.
pub fn slug(input: &str) -> String {
    collapse_non_alnum(input, '-')
}

/// Observed cell value form: NFKC, lowercase, dash variants unified,
/// whitespace collapsed.
pub fn normalize_value(input: &str) -> String {
    let folded: String = input
        .nfkc()
        .map(|c| if DASHES.contains(&c) { '-' } else { c })
        .collect::<String>()
        .to_lowercase();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lowercase and collapse whitespace, keeping punctuation.
pub fn collapse_whitespace_lower(input: &str) -> String {
    input
        .nfkc()
        .collect::<String>()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
