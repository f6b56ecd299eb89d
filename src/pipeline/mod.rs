//! Pipeline stages for datasheet ingestion.
//!
//! Each submodule implements one transformation step. Stages only talk to
//! collaborators through the traits in [`crate::backend`], so every stage is
//! testable with in-memory fakes.
//!
//! ## Data Flow
//!
//! ```text
//! strategy ──▶ table ──▶ resolve ──▶ variants
//! (OCR chain)  (rows)    (brand/code) (alias index, varying keys)
//! ```
//!
//! 1. [`strategy`]: run inline → online → batch extraction under per-call
//!    timeouts; never fails, degrades to an empty result
//! 2. [`pages`]: rank pages by ordering-table keywords; choose samples
//! 3. [`table`]: turn OCR tables into normalised catalog rows
//! 4. [`resolve`]: candidate-constrained brand/code/series resolution
//! 5. [`variants`]: merged alias index and variant-key inference
//!
//! [`normalize`], [`tokenize`] and [`postprocess`] hold the shared text rules.

pub mod normalize;
pub mod pages;
pub mod postprocess;
pub mod resolve;
pub mod strategy;
pub mod table;
pub mod tokenize;
pub mod variants;
