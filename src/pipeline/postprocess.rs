//! Post-processing: deterministic cleanup of extracted text and model replies.
//!
//! OCR engines and local text layers both produce artefacts that confuse the
//! tokenizer (`\r\n`, zero-width spaces inside part codes, runs of blank
//! lines). Generation engines wrap JSON in fences and chatter around it. The
//! rules here are cheap, pure `&str → String` passes; each is tested alone.

use crate::model::RawTable;
use once_cell::sync::Lazy;
use regex::Regex;

/// Clean the text of one extracted page.
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF → LF)
/// 2. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 3. Trim trailing whitespace per line
/// 4. Collapse 3+ consecutive blank lines down to 2
pub fn clean_page_text(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    collapse_blank_lines(&s).trim().to_string()
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 3: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 4: Collapse excessive blank lines ───────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{4,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n\n").to_string()
}

// ── Model replies ────────────────────────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:json|JSON)?\s*\n(.*)\n```\s*$").unwrap());

/// Pull the JSON object out of a generation reply.
///
/// Models sometimes fence the object or add a sentence before it despite the
/// prompt; the outermost `{ … }` is returned, or `None` if there is none.
pub fn extract_json_object(reply: &str) -> Option<&str> {
    let trimmed = reply.trim();
    let inner = match RE_OUTER_FENCES.captures(trimmed) {
        Some(caps) => caps.get(1).map_or(trimmed, |m| m.as_str()),
        None => trimmed,
    };
    let start = inner.find('{')?;
    let end = inner.rfind('}')?;
    (end > start).then(|| &inner[start..=end])
}

// ── Pipe tables in text ──────────────────────────────────────────────────────

fn is_table_row(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with('|') && trimmed.ends_with('|') && trimmed.len() > 2
}

fn is_separator_row(line: &str) -> bool {
    let trimmed = line.trim();
    if !trimmed.starts_with('|') {
        return false;
    }
    trimmed
        .chars()
        .all(|c| c == '|' || c == '-' || c == ':' || c == ' ')
}

fn split_cells(line: &str) -> Vec<String> {
    let trimmed = line.trim();
    let inner = trimmed
        .strip_prefix('|')
        .and_then(|s| s.strip_suffix('|'))
        .unwrap_or(trimmed);
    inner.split('|').map(|c| c.trim().to_string()).collect()
}

/// Harvest GFM pipe tables from extracted text.
///
/// Some OCR backends and every generation-based extractor emit tables as
/// Markdown. A block whose second line is a separator row gets its first line
/// as header; other blocks are headerless. Single-line blocks are ignored.
pub fn markdown_tables(text: &str, page: Option<usize>) -> Vec<RawTable> {
    let mut tables = Vec::new();
    let mut block: Vec<&str> = Vec::new();

    let mut flush = |block: &mut Vec<&str>| {
        if block.len() >= 2 {
            let has_header = block.len() >= 2 && is_separator_row(block[1]);
            let mut table = RawTable {
                page,
                ..RawTable::default()
            };
            for (i, line) in block.iter().enumerate() {
                if is_separator_row(line) {
                    continue;
                }
                if has_header && i == 0 {
                    table.header_rows.push(split_cells(line));
                } else {
                    table.body_rows.push(split_cells(line));
                }
            }
            if !table.body_rows.is_empty() {
                tables.push(table);
            }
        }
        block.clear();
    };

    for line in text.lines() {
        if is_table_row(line) {
            block.push(line);
        } else {
            flush(&mut block);
        }
    }
    flush(&mut block);
    tables
}

// ── Tests ────────────────────────────────────────────────────────────────────
