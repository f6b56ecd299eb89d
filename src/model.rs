//! Data types shared across the pipeline and returned to callers.

use crate::error::PipelineWarning;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One PDF in blob storage. Immutable input to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// `scheme://bucket/object`
    pub uri: String,
    pub filename: String,
    /// Page count known up front (e.g. from upload metadata), if any.
    pub page_count_hint: Option<usize>,
}

impl Document {
    pub fn new(uri: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            filename: filename.into(),
            page_count_hint: None,
        }
    }

    pub fn with_page_count_hint(mut self, pages: usize) -> Self {
        self.page_count_hint = Some(pages);
        self
    }
}

/// Text of a single page (1-indexed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageText {
    pub page: usize,
    pub text: String,
}

/// A page scored by the page selector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCandidate {
    pub page_number: usize,
    pub score: usize,
    pub text_excerpt: String,
}

/// A table as reported by an OCR backend, already normalised to strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTable {
    /// Page the table was found on, when the backend reports it.
    pub page: Option<usize>,
    pub header_rows: Vec<Vec<String>>,
    pub body_rows: Vec<Vec<String>>,
}

/// Which extraction strategy produced the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategySource {
    Inline,
    Online,
    Batch,
    Empty,
}

impl fmt::Display for StrategySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StrategySource::Inline => "inline",
            StrategySource::Online => "online",
            StrategySource::Batch => "batch",
            StrategySource::Empty => "empty",
        };
        f.write_str(s)
    }
}

/// Outcome of the extraction strategy engine for one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub text: String,
    pub pages: Vec<PageText>,
    pub tables: Vec<RawTable>,
    pub strategy_source: StrategySource,
    /// Degradation reason; empty when the preferred path succeeded.
    pub note: String,
}

impl ExtractionResult {
    /// Terminal result when every strategy failed or was skipped.
    pub fn empty(note: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            pages: Vec::new(),
            tables: Vec::new(),
            strategy_source: StrategySource::Empty,
            note: note.into(),
        }
    }

    /// Assemble a result from per-page text; `text` is the pages joined by
    /// blank lines in page order.
    pub fn from_pages(
        mut pages: Vec<PageText>,
        tables: Vec<RawTable>,
        strategy_source: StrategySource,
        note: impl Into<String>,
    ) -> Self {
        pages.sort_by_key(|p| p.page);
        let text = pages
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        Self {
            text,
            pages,
            tables,
            strategy_source,
            note: note.into(),
        }
    }
}

/// A normalised ordering-table row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogRow {
    pub code: String,
    pub series: String,
    pub desc: String,
    pub raw_cells: Vec<String>,
    pub verified_pages: Vec<usize>,
}

/// How a [`BrandResolution`] was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionSource {
    Ai,
    Heuristic,
    None,
}

/// Manufacturer, part code and series for a document.
///
/// Empty strings mean "not determined"; they are never an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrandResolution {
    pub brand: String,
    pub code: String,
    pub series: String,
    pub source: ResolutionSource,
}

impl BrandResolution {
    pub fn none() -> Self {
        Self {
            brand: String::new(),
            code: String::new(),
            series: String::new(),
            source: ResolutionSource::None,
        }
    }
}

/// A known manufacturer and the spellings it appears under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrandEntry {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// Closed set of brands the resolver may answer with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrandDictionary {
    pub brands: Vec<BrandEntry>,
}

impl BrandDictionary {
    pub fn new(brands: Vec<BrandEntry>) -> Self {
        Self { brands }
    }

    pub fn is_empty(&self) -> bool {
        self.brands.is_empty()
    }
}

/// Timings and counts for one ingestion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionStats {
    pub pages: usize,
    pub tables: usize,
    pub rows: usize,
    pub extraction_ms: u64,
    pub resolution_ms: u64,
    pub total_duration_ms: u64,
}

/// Everything the ingestion caller receives for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionOutput {
    pub document: Document,
    pub brand: String,
    pub code: String,
    pub series: String,
    pub resolution_source: ResolutionSource,
    pub rows: Vec<CatalogRow>,
    /// Varying keys not yet declared by the blueprint.
    pub new_variant_keys: Vec<String>,
    /// Every key that reached the variation threshold.
    pub detected_variant_keys: Vec<String>,
    pub strategy_source: StrategySource,
    pub note: String,
    pub warnings: Vec<PipelineWarning>,
    pub stats: IngestionStats,
}
