//! Collaborator seams: blob storage, text extraction, OCR, constrained
//! generation and the relational store.
//!
//! The pipeline only sees the traits in this module. Each trait has one
//! concrete adapter in a submodule; tests substitute in-memory fakes.
//!
//! Loosely-typed collaborator payloads are normalised here, at the boundary,
//! so the pipeline only ever handles [`OcrOutput`] and plain values.

pub mod blob;
pub mod llm;
pub mod ocr;
pub mod pdf;
pub mod pg;

pub use blob::LocalBlobStore;
pub use llm::LlmGenerationEngine;
pub use ocr::HttpOcrEngine;
pub use pdf::PdfiumTextExtractor;
pub use pg::PgStore;

use crate::blueprint::{Blueprint, Recipe};
use crate::error::{BackendError, CatalogError};
use crate::model::{BrandDictionary, PageText, RawTable};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Form feed; separates logical pages in extracted text.
pub const PAGE_BREAK: char = '\u{000C}';

/// Object storage addressed by `scheme://bucket/object` URIs.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fails with [`BackendError::NotFound`] when the object is absent.
    async fn download(&self, uri: &str) -> Result<Vec<u8>, BackendError>;

    /// URIs of every object under `prefix_uri`, sorted.
    async fn list(&self, prefix_uri: &str) -> Result<Vec<String>, BackendError>;
}

/// Local, lightweight text extraction.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Plain text of the whole document, pages separated by [`PAGE_BREAK`].
    async fn extract_text(&self, bytes: &[u8]) -> Result<String, BackendError>;
}

/// Pages and tables returned by an OCR call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcrOutput {
    pub pages: Vec<PageText>,
    pub tables: Vec<RawTable>,
}

/// Handle of a submitted batch OCR job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchJob {
    pub name: String,
    /// Where the job writes its result documents.
    pub output_prefix: String,
}

/// Remote OCR engine with a page-limited inline mode and a batch mode.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Processor identity; must be non-empty.
    fn processor(&self) -> &str;

    /// Synchronous OCR of `bytes`, restricted to `pages` (1-based) when given.
    ///
    /// An explicit page-limit rejection is [`BackendError::PageLimitExceeded`].
    async fn process_inline(
        &self,
        bytes: &[u8],
        pages: Option<&[usize]>,
    ) -> Result<OcrOutput, BackendError>;

    /// Start an asynchronous job over the blob at `uri`.
    async fn submit_batch(&self, uri: &str, output_prefix: &str)
        -> Result<BatchJob, BackendError>;

    /// Wait until `job` has finished; callers bound this with a timeout.
    async fn wait_batch(&self, job: &BatchJob) -> Result<(), BackendError>;
}

/// Sampling options for a constrained generation call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_output_tokens: usize,
}

/// LLM-style engine answering with a JSON object.
#[async_trait]
pub trait GenerationEngine: Send + Sync {
    /// Model identity; must be non-empty.
    fn model(&self) -> &str;

    async fn generate_json(
        &self,
        system: &str,
        payload: &Value,
        options: GenerationOptions,
    ) -> Result<Value, BackendError>;
}

/// A live column as reported by `information_schema.columns`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveColumn {
    pub name: String,
    pub data_type: String,
    pub udt_name: String,
}

impl LiveColumn {
    pub fn new(
        name: impl Into<String>,
        data_type: impl Into<String>,
        udt_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            udt_name: udt_name.into(),
        }
    }
}

/// A live index as reported by `pg_indexes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveIndex {
    pub name: String,
    pub definition: String,
}

/// Catalog database: schema introspection, DDL, and blueprint lookups.
#[async_trait]
pub trait RelationalStore: Send + Sync {
    async fn columns(&self, table: &str) -> Result<Vec<LiveColumn>, CatalogError>;

    async fn indexes(&self, table: &str) -> Result<Vec<LiveIndex>, CatalogError>;

    async fn execute(&self, sql: &str) -> Result<(), CatalogError>;

    async fn blueprint(&self, family: &str) -> Result<Option<Blueprint>, CatalogError>;

    async fn recipes(&self, family: &str) -> Result<Vec<Recipe>, CatalogError>;

    async fn brands(&self) -> Result<BrandDictionary, CatalogError>;
}

// ── OCR result normalisation ─────────────────────────────────────────────────

fn first_field<'a>(v: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|n| v.get(*n))
}

fn as_index(v: &Value) -> Option<usize> {
    match v {
        Value::Number(n) => n.as_u64().map(|n| n as usize),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Text addressed by a `textAnchor` against the document-level text.
fn anchored_text(anchor: &Value, doc_text: &str) -> Option<String> {
    let segments = first_field(anchor, &["textSegments", "text_segments"])?.as_array()?;
    let chars: Vec<char> = doc_text.chars().collect();
    let mut out = String::new();
    for seg in segments {
        let start = first_field(seg, &["startIndex", "start_index"])
            .and_then(as_index)
            .unwrap_or(0);
        let end = first_field(seg, &["endIndex", "end_index"])
            .and_then(as_index)
            .unwrap_or(0)
            .min(chars.len());
        if start < end {
            out.extend(&chars[start..end]);
        }
    }
    Some(out)
}

/// Text of a page, cell or layout element in any of the known shapes.
fn element_text(v: &Value, doc_text: &str) -> String {
    if let Some(s) = v.as_str() {
        return s.to_string();
    }
    if let Some(s) = first_field(v, &["text", "content"]).and_then(Value::as_str) {
        return s.to_string();
    }
    let layout = v.get("layout").unwrap_or(v);
    first_field(layout, &["textAnchor", "text_anchor"])
        .and_then(|a| anchored_text(a, doc_text))
        .unwrap_or_default()
}

fn parse_rows(v: Option<&Value>, doc_text: &str) -> Vec<Vec<String>> {
    let Some(rows) = v.and_then(Value::as_array) else {
        return Vec::new();
    };
    rows.iter()
        .map(|row| {
            let cells = row
                .get("cells")
                .and_then(Value::as_array)
                .or_else(|| row.as_array());
            cells
                .map(|cells| {
                    cells
                        .iter()
                        .map(|c| element_text(c, doc_text).trim().to_string())
                        .collect()
                })
                .unwrap_or_default()
        })
        .collect()
}

/// Normalise one OCR result document into [`OcrOutput`].
///
/// Accepts a bare document or one wrapped in `{"document": …}`, camelCase or
/// snake_case field names, page text given inline or as anchors into the
/// document text, and table cells given as strings or objects. Pages without
/// a number are numbered by position.
pub fn parse_ocr_document(value: &Value) -> Result<OcrOutput, BackendError> {
    let doc = value.get("document").unwrap_or(value);
    let Some(pages) = doc.get("pages").and_then(Value::as_array) else {
        return Err(BackendError::Malformed(
            "OCR result has no 'pages' array".into(),
        ));
    };
    let doc_text = doc.get("text").and_then(Value::as_str).unwrap_or_default();

    let mut out = OcrOutput::default();
    for (i, page) in pages.iter().enumerate() {
        let number = first_field(page, &["pageNumber", "page_number", "page"])
            .and_then(as_index)
            .unwrap_or(i + 1);
        out.pages.push(PageText {
            page: number,
            text: element_text(page, doc_text),
        });

        if let Some(tables) = page.get("tables").and_then(Value::as_array) {
            for table in tables {
                out.tables.push(RawTable {
                    page: Some(number),
                    header_rows: parse_rows(
                        first_field(table, &["headerRows", "header_rows"]),
                        doc_text,
                    ),
                    body_rows: parse_rows(first_field(table, &["bodyRows", "body_rows"]), doc_text),
                });
            }
        }
    }
    Ok(out)
}

/// Split extracted text into 1-based pages on [`PAGE_BREAK`].
///
/// A trailing break does not produce an extra empty page.
pub fn split_pages(text: &str) -> Vec<PageText> {
    let trimmed = text.strip_suffix(PAGE_BREAK).unwrap_or(text);
    if trimmed.is_empty() {
        return Vec::new();
    }
    trimmed
        .split(PAGE_BREAK)
        .enumerate()
        .map(|(i, t)| PageText {
            page: i + 1,
            text: t.to_string(),
        })
        .collect()
}

/// Split a `scheme://bucket/object` URI.
pub fn split_uri(uri: &str) -> Result<(&str, &str, &str), BackendError> {
    let (scheme, rest) = uri
        .split_once("://")
        .ok_or_else(|| BackendError::Failed(format!("not a scheme://bucket/object URI: {uri}")))?;
    let (bucket, object) = rest.split_once('/').unwrap_or((rest, ""));
    if scheme.is_empty() || bucket.is_empty() {
        return Err(BackendError::Failed(format!(
            "not a scheme://bucket/object URI: {uri}"
        )));
    }
    Ok((scheme, bucket, object))
}
