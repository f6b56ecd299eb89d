//! Table normalisation: raw OCR tables → deduplicated [`CatalogRow`]s.
//!
//! Header cells are mapped onto three canonical fields (`code`, `series`,
//! `desc`) through multilingual synonym lists; everything else is `other` and
//! only survives in `raw_cells`.

use super::normalize::{collapse_whitespace_lower, normalize_key};
use super::tokenize::strip_code_edges;
use crate::model::{CatalogRow, PageText, RawTable};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use unicode_normalization::UnicodeNormalization;

/// Canonical field a header column maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKey {
    Code,
    Series,
    Desc,
    Other,
}

impl FieldKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKey::Code => "code",
            FieldKey::Series => "series",
            FieldKey::Desc => "desc",
            FieldKey::Other => "other",
        }
    }
}

const CODE_SYNONYMS: &[&str] = &[
    "code", "part no", "part no.", "part number", "part #", "p/n", "pn", "type", "type no",
    "type no.", "type number", "model", "model no", "model number", "catalog no",
    "catalogue no", "cat. no", "catalog number", "order no", "order code", "ordering code",
    "order number", "article no", "sku", "typ", "bestellnummer", "artikelnummer",
    "référence", "reference", "ref", "código", "codice", "品番", "型番", "型式", "型号",
    "品号", "형번", "모델",
];

const SERIES_SYNONYMS: &[&str] = &[
    "series", "product series", "family", "product family", "line", "product line",
    "serie", "série", "baureihe", "シリーズ", "系列", "시리즈",
];

const DESC_SYNONYMS: &[&str] = &[
    "description", "desc", "name", "product name", "details", "remarks", "features",
    "beschreibung", "designation", "désignation", "descripción", "名称", "品名", "説明",
    "描述", "설명",
];

struct SynonymSet {
    plain: HashSet<String>,
    keyed: HashSet<String>,
}

impl SynonymSet {
    fn new(words: &[&str]) -> Self {
        Self {
            plain: words.iter().map(|w| collapse_whitespace_lower(w)).collect(),
            keyed: words.iter().map(|w| normalize_key(w)).collect(),
        }
    }

    fn contains(&self, plain: &str, keyed: &str) -> bool {
        self.plain.contains(plain) || (!keyed.is_empty() && self.keyed.contains(keyed))
    }
}

static CODE_SET: Lazy<SynonymSet> = Lazy::new(|| SynonymSet::new(CODE_SYNONYMS));
static SERIES_SET: Lazy<SynonymSet> = Lazy::new(|| SynonymSet::new(SERIES_SYNONYMS));
static DESC_SET: Lazy<SynonymSet> = Lazy::new(|| SynonymSet::new(DESC_SYNONYMS));

static RE_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z0-9][A-Z0-9\-._/]*$").unwrap());

/// Snake-case key of a header label: `"Type No."` → `"type_no"`.
pub fn header_key(label: &str) -> String {
    normalize_key(label)
}

/// Map a header label onto its canonical field.
pub fn normalize_header(label: &str) -> FieldKey {
    let plain = collapse_whitespace_lower(label);
    let keyed = normalize_key(label);
    if CODE_SET.contains(&plain, &keyed) {
        FieldKey::Code
    } else if SERIES_SET.contains(&plain, &keyed) {
        FieldKey::Series
    } else if DESC_SET.contains(&plain, &keyed) {
        FieldKey::Desc
    } else {
        FieldKey::Other
    }
}

/// Normalise a code cell; `None` when nothing code-shaped remains.
pub fn normalize_code(cell: &str) -> Option<String> {
    let folded: String = cell
        .nfkc()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase();
    let code = strip_code_edges(&folded);
    if RE_CODE.is_match(code) {
        Some(code.to_string())
    } else {
        None
    }
}

/// The header row with the most non-empty cells (first wins on ties).
fn longest_header(raw: &RawTable) -> Option<&Vec<String>> {
    let mut best: Option<(&Vec<String>, usize)> = None;
    for row in &raw.header_rows {
        let filled = row.iter().filter(|c| !c.trim().is_empty()).count();
        if best.map_or(true, |(_, n)| filled > n) {
            best = Some((row, filled));
        }
    }
    best.map(|(row, _)| row)
}

/// Header and body of a table; headerless tables promote their first body row.
fn split_header(raw: &RawTable) -> Option<(&[String], &[Vec<String>])> {
    match longest_header(raw) {
        Some(h) => Some((h.as_slice(), raw.body_rows.as_slice())),
        None => raw
            .body_rows
            .split_first()
            .map(|(h, rest)| (h.as_slice(), rest)),
    }
}

/// Parse one raw table into catalog rows.
///
/// Rows without a valid code are dropped; output is deduplicated by
/// `(code, series)` keeping the first occurrence.
pub fn parse_table(raw: &RawTable) -> Vec<CatalogRow> {
    let Some((header, body)) = split_header(raw) else {
        return Vec::new();
    };
    let keys: Vec<FieldKey> = header.iter().map(|h| normalize_header(h)).collect();

    let mut rows = Vec::with_capacity(body.len());
    for cells in body {
        let mut code: Option<String> = None;
        let mut series: Option<String> = None;
        let mut desc_parts: Vec<&str> = Vec::new();

        for (i, cell) in cells.iter().enumerate() {
            let value = cell.trim();
            if value.is_empty() {
                continue;
            }
            match keys.get(i).copied().unwrap_or(FieldKey::Other) {
                FieldKey::Code if code.is_none() => code = normalize_code(value),
                FieldKey::Series if series.is_none() => series = Some(value.to_string()),
                FieldKey::Desc => desc_parts.push(value),
                _ => {}
            }
        }

        let Some(code) = code else { continue };
        rows.push(CatalogRow {
            code,
            series: series.unwrap_or_default(),
            desc: desc_parts.join(" "),
            raw_cells: cells.iter().map(|c| c.trim().to_string()).collect(),
            verified_pages: raw.page.into_iter().collect(),
        });
    }

    dedup_rows(rows)
}

/// Parse every table and deduplicate across them.
pub fn parse_tables(tables: &[RawTable]) -> Vec<CatalogRow> {
    dedup_rows(tables.iter().flat_map(parse_table).collect())
}

/// Keep the first row for each `(code, series)`.
pub fn dedup_rows(rows: Vec<CatalogRow>) -> Vec<CatalogRow> {
    let mut seen = HashSet::new();
    rows.into_iter()
        .filter(|r| seen.insert((r.code.clone(), r.series.clone())))
        .collect()
}

/// `{header label → cell}` per body row.
pub fn row_dicts(raw: &RawTable) -> Vec<BTreeMap<String, String>> {
    let Some((header, body)) = split_header(raw) else {
        return Vec::new();
    };
    body.iter()
        .map(|cells| {
            header
                .iter()
                .zip(cells)
                .filter(|(h, c)| !h.trim().is_empty() && !c.trim().is_empty())
                .map(|(h, c)| (h.trim().to_string(), c.trim().to_string()))
                .collect()
        })
        .collect()
}

/// Add every page whose text mentions the row code to `verified_pages`.
pub fn verify_pages(rows: &mut [CatalogRow], pages: &[PageText]) {
    let upper_pages: Vec<(usize, String)> = pages
        .iter()
        .map(|p| (p.page, p.text.to_uppercase()))
        .collect();
    for row in rows.iter_mut() {
        for (page, text) in &upper_pages {
            if text.contains(&row.code) && !row.verified_pages.contains(page) {
                row.verified_pages.push(*page);
            }
        }
        row.verified_pages.sort_unstable();
    }
}
