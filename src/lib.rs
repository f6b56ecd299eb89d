//! # datasheet-catalog
//!
//! Turn product datasheet PDFs into structured catalog records: brand, part
//! code, series, the attribute keys that vary across a product's ordering
//! table, and normalised rows ready for a relational catalog.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF (blob URI)
//!  │
//!  ├─ 1. Extract   inline text → online OCR → batch OCR → empty, each call
//!  │               bounded by a timeout
//!  ├─ 2. Tables    canonical headers, code normalisation, (code, series) dedup
//!  ├─ 3. Resolve   brand/code/series chosen only from closed candidate sets
//!  └─ 4. Variants  merged alias index, keys with ≥ 2 distinct values
//!
//! Blueprint change ──► schema::reconcile  (column diff + idempotent DDL)
//! ```
//!
//! Every external system sits behind a trait in [`backend`]: blob storage,
//! local text extraction, OCR, constrained generation and the relational
//! store. Each has one concrete adapter; tests use in-memory fakes.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use datasheet_catalog::backend::{LocalBlobStore, PdfiumTextExtractor};
//! use datasheet_catalog::{ingest, Blueprint, IngestRequest, PipelineConfig, PipelineContext};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ctx = PipelineContext::new(
//!         Arc::new(LocalBlobStore::new("./blobs")),
//!         PipelineConfig::default(),
//!     )
//!     .with_text_extractor(Arc::new(PdfiumTextExtractor::new()));
//!
//!     let blueprint = Blueprint {
//!         family: "relays".into(),
//!         fields: vec![],
//!         variant_keys: vec!["coil_voltage".into()],
//!     };
//!     let req = IngestRequest::new("file://datasheets/g5v.pdf", "g5v.pdf", blueprint);
//!     let out = ingest(&ctx, req).await?;
//!     println!("{} {} ({} rows via {})", out.brand, out.code, out.rows.len(), out.strategy_source);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `catalog` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod backend;
pub mod blueprint;
pub mod config;
pub mod error;
pub mod ingest;
pub mod model;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod schema;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use blueprint::{Blueprint, BlueprintField, FieldType, Recipe};
pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use error::{BackendError, CatalogError, Diagnostics, PipelineWarning};
pub use ingest::{ingest, IngestRequest, PipelineContext};
pub use model::{
    BrandDictionary, BrandEntry, BrandResolution, CatalogRow, Document, ExtractionResult,
    IngestionOutput, IngestionStats, PageText, RawTable, ResolutionSource, StrategySource,
};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, PipelineStage, ProgressCallback};
pub use schema::{reconcile, FieldDiff, MigrationStatement, Reconciliation, StatementKind};
pub use stream::{ingest_many, ingest_stream, IngestStream};
