//! Progress-callback trait for per-document ingestion events.
//!
//! Put an [`Arc<dyn PipelineProgressCallback>`] in
//! [`crate::PipelineContext::progress`] to receive events as documents move
//! through the pipeline. With [`crate::ingest_many`] several documents run at
//! once, so implementations must tolerate concurrent calls.
//!
//! # Example
//!
//! ```rust
//! use datasheet_catalog::{IngestionOutput, PipelineProgressCallback};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct Counter(AtomicUsize);
//!
//! impl PipelineProgressCallback for Counter {
//!     fn on_document_complete(&self, _uri: &str, output: &IngestionOutput) {
//!         self.0.fetch_add(output.rows.len(), Ordering::SeqCst);
//!     }
//! }
//! ```

use crate::model::IngestionOutput;
use std::sync::Arc;

/// Named step of one document's run, reported via
/// [`PipelineProgressCallback::on_stage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Extraction,
    Tables,
    Resolution,
    Variants,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Extraction => "extraction",
            PipelineStage::Tables => "tables",
            PipelineStage::Resolution => "resolution",
            PipelineStage::Variants => "variants",
        }
    }
}

/// Called by the pipeline as it processes each document.
///
/// All methods default to no-ops so callers only override what they need.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called once before extraction starts.
    fn on_document_start(&self, uri: &str) {
        let _ = uri;
    }

    /// Called when `stage` begins for the document at `uri`.
    fn on_stage(&self, uri: &str, stage: PipelineStage) {
        let _ = (uri, stage);
    }

    /// Called once the document has produced its output.
    fn on_document_complete(&self, uri: &str, output: &IngestionOutput) {
        let _ = (uri, output);
    }

    /// Called when the document's run ended with a fatal error.
    fn on_document_error(&self, uri: &str, error: &str) {
        let _ = (uri, error);
    }
}

/// The default callback; ignores everything.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;
