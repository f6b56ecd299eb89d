//! Error types for the datasheet-catalog library.
//!
//! Three distinct types reflect three distinct failure modes:
//!
//! * [`CatalogError`] is **fatal**: the operation cannot proceed at all
//!   (a backend is configured without its identity, a blueprint is malformed,
//!   a DDL statement failed). Returned as `Err(CatalogError)`.
//!
//! * [`BackendError`] means a single collaborator call failed (blob missing, OCR
//!   page-limit rejection, timeout, malformed response). The extraction engine
//!   recovers from these locally by advancing its fallback chain.
//!
//! * [`PipelineWarning`] holds **non-fatal** diagnostics accumulated per document
//!   run in [`Diagnostics`] and returned in
//!   [`crate::model::IngestionOutput::warnings`], so callers and tests can
//!   assert on degradation paths instead of scraping logs.

use crate::model::StrategySource;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// All fatal errors returned by the datasheet-catalog library.
#[derive(Debug, Error)]
pub enum CatalogError {
    // ── Config errors ─────────────────────────────────────────────────────
    /// A backend is wired in but lacks a required identity, or the builder
    /// rejected a value.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Blueprint cannot be used (no family, duplicate fields, bad type).
    #[error("Blueprint '{family}' is invalid: {detail}")]
    InvalidBlueprint { family: String, detail: String },

    // ── Store errors ──────────────────────────────────────────────────────
    /// Introspection or lookup against the relational store failed.
    #[error("Relational store error: {0}")]
    Store(String),

    /// A migration statement failed part-way through a reconciliation.
    ///
    /// Statements are not wrapped in a transaction: `applied` statements
    /// before the failing one are already live in the database.
    #[error(
        "Migration stopped after {applied} applied statement(s).\n\
Failing statement: {statement}\n\
Database said: {detail}"
    )]
    Migration {
        applied: usize,
        statement: String,
        detail: String,
    },
}

/// A failed call to an external collaborator.
///
/// A timed-out call is reported as [`BackendError::Failed`]; callers never
/// need to distinguish a timer win from any other failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// Blob does not exist.
    #[error("object not found: {uri}")]
    NotFound { uri: String },

    /// OCR engine refused the request because of its page ceiling.
    #[error("page limit exceeded: {detail}")]
    PageLimitExceeded { detail: String },

    /// Collaborator answered, but the payload could not be understood.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Any other failure, including timeouts.
    #[error("{0}")]
    Failed(String),
}

/// A non-fatal event recorded while processing one document.
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineWarning {
    /// Blob download failed; strategies needing bytes are skipped.
    #[error("download of '{uri}' failed: {detail}")]
    DownloadFailed { uri: String, detail: String },

    /// A strategy was not attempted.
    #[error("{strategy} strategy skipped: {reason}")]
    StrategySkipped {
        strategy: StrategySource,
        reason: String,
    },

    /// Local text extraction failed or timed out.
    #[error("inline extraction failed: {detail}")]
    InlineFailed { detail: String },

    /// Local text extraction produced too little text to trust.
    #[error("inline extraction produced {chars} chars (< {min_chars})")]
    InlineInsufficient { chars: usize, min_chars: usize },

    /// Local text exceeded the inline page ceiling and was cut.
    #[error("inline text truncated to {kept} of {total} pages")]
    InlineTruncated { kept: usize, total: usize },

    /// Online OCR failed or timed out.
    #[error("online OCR failed: {detail}")]
    OnlineFailed { detail: String },

    /// Online OCR hit the page ceiling and was retried on a sample.
    #[error("online OCR page limit hit; retrying with sampled pages {pages:?}")]
    OnlineResampled { pages: Vec<usize> },

    /// Batch OCR failed, timed out, or produced no readable output.
    #[error("batch OCR failed: {detail}")]
    BatchFailed { detail: String },

    /// The generation engine failed; the resolver fell back to heuristics.
    #[error("constrained generation failed: {detail}")]
    GenerationFailed { detail: String },

    /// The generation engine answered with a value outside the candidate set.
    #[error("rejected {field} '{value}': not among the supplied candidates")]
    RejectedCandidate { field: String, value: String },

    /// Recipe lookup failed; only blueprint aliases were used.
    #[error("recipe lookup failed: {detail}")]
    RecipeLookupFailed { detail: String },

    /// No table produced a usable row.
    #[error("no catalog rows could be parsed from {tables} table(s)")]
    NoRows { tables: usize },
}

/// Warnings accumulated over one pipeline run.
///
/// Every pushed warning is also emitted through `tracing` so operators see
/// it in logs while callers get it back as data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    warnings: Vec<PipelineWarning>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, warning: PipelineWarning) {
        warn!("{}", warning);
        self.warnings.push(warning);
    }

    pub fn warnings(&self) -> &[PipelineWarning] {
        &self.warnings
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }

    /// The most recent warning, used as the degradation note.
    pub fn last(&self) -> Option<&PipelineWarning> {
        self.warnings.last()
    }

    pub fn into_vec(self) -> Vec<PipelineWarning> {
        self.warnings
    }
}
