//! Extraction strategy engine: inline text → online OCR → batch OCR → empty.
//!
//! ## State machine
//!
//! ```text
//!  download ──► INLINE ──ok──────────────────────────────► result (inline)
//!                 │ failed / insufficient / truncated
//!                 ▼
//!              ONLINE ──ok──────────────────────────────► result (online)
//!                 │ page-limit → resample, retry once
//!                 │ failed / skipped
//!                 ▼
//!              BATCH ──ok───────────────────────────────► result (batch)
//!                 │ failed / skipped
//!                 ▼
//!     degraded inline text (with note)  or  EMPTY (note = last failure)
//! ```
//!
//! Every remote call goes through [`with_timeout`]; a timeout is an ordinary
//! failure that advances the chain. [`ExtractionEngine::run`] never returns
//! an error: each failure becomes a [`PipelineWarning`] in the run's
//! [`Diagnostics`].

use crate::backend::{split_pages, BlobStore, OcrEngine, OcrOutput, TextExtractor};
use crate::config::PipelineConfig;
use crate::error::{BackendError, CatalogError, Diagnostics, PipelineWarning};
use crate::model::{Document, ExtractionResult, PageText, RawTable, StrategySource};
use crate::pipeline::normalize::slug;
use crate::pipeline::pages::{sample_pages, select_pages_limited};
use crate::pipeline::postprocess::{clean_page_text, markdown_tables};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Race `fut` against a `secs`-second timer.
///
/// A timer win is reported as [`BackendError::Failed`], exactly like any
/// other collaborator failure.
pub async fn with_timeout<T, F>(secs: u64, fut: F) -> Result<T, BackendError>
where
    F: Future<Output = Result<T, BackendError>>,
{
    match tokio::time::timeout(Duration::from_secs(secs), fut).await {
        Ok(result) => result,
        Err(_) => Err(BackendError::Failed(format!("timed out after {secs}s"))),
    }
}

/// Page selector for the first online attempt.
///
/// A targeted selection wins; otherwise the first `limit` pages of a document
/// of known size; otherwise no selector (whole document).
fn online_selector(estimate: Option<usize>, selected: &[usize], limit: usize) -> Option<Vec<usize>> {
    if !selected.is_empty() {
        return Some(selected.to_vec());
    }
    estimate.map(|n| (1..=n.min(limit)).collect())
}

/// Pages for the single retry after a page-limit rejection.
fn resample(estimate: Option<usize>, limit: usize) -> Vec<usize> {
    match estimate {
        Some(n) => sample_pages(n, limit),
        None => (1..=limit).collect(),
    }
}

/// Output prefix owned by one batch run of `doc`.
///
/// Keyed by the whole URI plus a fresh run id, so neither same-named
/// documents in other buckets nor earlier runs share result blobs.
fn batch_prefix(base: &str, doc: &Document) -> String {
    let name = slug(&doc.uri);
    format!(
        "{}/{}/{}",
        base.trim_end_matches('/'),
        if name.is_empty() { "document" } else { name.as_str() },
        Uuid::new_v4().simple()
    )
}

/// Clean page text and keep only pages with content.
fn clean_pages(pages: Vec<PageText>) -> Vec<PageText> {
    pages
        .into_iter()
        .map(|p| PageText {
            page: p.page,
            text: clean_page_text(&p.text),
        })
        .filter(|p| !p.text.is_empty())
        .collect()
}

/// Structured tables when the engine produced any, else pipe tables found in
/// the page text.
fn tables_or_markdown(tables: Vec<RawTable>, pages: &[PageText]) -> Vec<RawTable> {
    if !tables.is_empty() {
        return tables;
    }
    pages
        .iter()
        .flat_map(|p| markdown_tables(&p.text, Some(p.page)))
        .collect()
}

/// Merge OCR outputs: pages sorted by number, first occurrence of a page wins.
pub fn merge_outputs(outputs: Vec<OcrOutput>) -> OcrOutput {
    let mut pages: BTreeMap<usize, PageText> = BTreeMap::new();
    let mut tables = Vec::new();
    for out in outputs {
        for p in out.pages {
            pages.entry(p.page).or_insert(p);
        }
        tables.extend(out.tables);
    }
    OcrOutput {
        pages: pages.into_values().collect(),
        tables,
    }
}

/// One engine, three pluggable backends.
pub struct ExtractionEngine<'a> {
    blobs: &'a dyn BlobStore,
    text: Option<&'a dyn TextExtractor>,
    ocr: Option<&'a dyn OcrEngine>,
    config: &'a PipelineConfig,
}

/// What the inline state learned, for later states.
#[derive(Default)]
struct InlineOutcome {
    /// Every page of the local text layer, untruncated.
    pages: Vec<PageText>,
    /// Non-empty text that was not accepted outright.
    degraded: Option<ExtractionResult>,
}

impl<'a> ExtractionEngine<'a> {
    /// Fails with [`CatalogError::Config`] if `ocr` has no processor identity.
    pub fn new(
        blobs: &'a dyn BlobStore,
        text: Option<&'a dyn TextExtractor>,
        ocr: Option<&'a dyn OcrEngine>,
        config: &'a PipelineConfig,
    ) -> Result<Self, CatalogError> {
        if let Some(engine) = ocr {
            if engine.processor().trim().is_empty() {
                return Err(CatalogError::Config(
                    "OCR engine is configured without a processor identity".into(),
                ));
            }
        }
        Ok(Self {
            blobs,
            text,
            ocr,
            config,
        })
    }

    /// Extract text and tables from `doc`. Never fails.
    pub async fn run(&self, doc: &Document, diagnostics: &mut Diagnostics) -> ExtractionResult {
        let call_secs = self.config.call_timeout_secs;
        let mut last_failure = String::new();

        let bytes = match with_timeout(call_secs, self.blobs.download(&doc.uri)).await {
            Ok(b) => Some(b),
            Err(e) => {
                last_failure = format!("download failed: {e}");
                diagnostics.push(PipelineWarning::DownloadFailed {
                    uri: doc.uri.clone(),
                    detail: e.to_string(),
                });
                None
            }
        };

        let inline = self
            .inline_attempt(bytes.as_deref(), doc.page_count_hint, diagnostics, &mut last_failure)
            .await;
        if let Some(result) = inline.degraded.as_ref().filter(|r| r.note.is_empty()) {
            return result.clone();
        }

        let estimate = doc
            .page_count_hint
            .or((!inline.pages.is_empty()).then_some(inline.pages.len()));

        if let Some(result) = self
            .online_attempt(bytes.as_deref(), estimate, &inline.pages, diagnostics, &mut last_failure)
            .await
        {
            return result;
        }

        if let Some(result) = self.batch_attempt(doc, diagnostics, &mut last_failure).await {
            return result;
        }

        if let Some(result) = inline.degraded {
            info!(uri = %doc.uri, "Falling back to degraded inline text: {}", result.note);
            return result;
        }

        if last_failure.is_empty() {
            last_failure = "no extraction strategy produced text".to_string();
        }
        info!(uri = %doc.uri, "All extraction strategies failed: {}", last_failure);
        ExtractionResult::empty(last_failure)
    }

    /// INLINE_ATTEMPT. An accepted result comes back as `degraded` with an
    /// empty note.
    ///
    /// A page-count hint larger than the text layer is taken as the document
    /// size.
    async fn inline_attempt(
        &self,
        bytes: Option<&[u8]>,
        page_count_hint: Option<usize>,
        diagnostics: &mut Diagnostics,
        last_failure: &mut String,
    ) -> InlineOutcome {
        let mut outcome = InlineOutcome::default();
        if !self.config.is_enabled(StrategySource::Inline) {
            return outcome;
        }
        let (Some(extractor), Some(bytes)) = (self.text, bytes) else {
            let reason = if self.text.is_none() {
                "no text extractor configured"
            } else {
                "document bytes unavailable"
            };
            diagnostics.push(PipelineWarning::StrategySkipped {
                strategy: StrategySource::Inline,
                reason: reason.into(),
            });
            return outcome;
        };

        let raw = match with_timeout(self.config.call_timeout_secs, extractor.extract_text(bytes)).await {
            Ok(raw) => raw,
            Err(e) => {
                *last_failure = format!("inline extraction failed: {e}");
                diagnostics.push(PipelineWarning::InlineFailed {
                    detail: e.to_string(),
                });
                return outcome;
            }
        };

        let pages = split_pages(&raw);
        let total = pages.len().max(page_count_hint.unwrap_or_default());
        let limit = self.config.inline_page_limit;
        outcome.pages = pages
            .iter()
            .map(|p| PageText {
                page: p.page,
                text: clean_page_text(&p.text),
            })
            .collect();
        debug!(pages = total, "Inline text extracted");

        let (kept, note) = if total > limit {
            let kept = outcome.pages.len().min(limit);
            diagnostics.push(PipelineWarning::InlineTruncated { kept, total });
            let note = format!("inline text truncated to {kept} of {total} pages");
            *last_failure = note.clone();
            (outcome.pages[..kept].to_vec(), note)
        } else {
            let chars: usize = outcome.pages.iter().map(|p| p.text.chars().count()).sum();
            if chars < self.config.min_inline_chars {
                diagnostics.push(PipelineWarning::InlineInsufficient {
                    chars,
                    min_chars: self.config.min_inline_chars,
                });
                let note = format!(
                    "inline text has {chars} chars, below the {} char minimum",
                    self.config.min_inline_chars
                );
                *last_failure = note.clone();
                (outcome.pages.clone(), note)
            } else {
                (outcome.pages.clone(), String::new())
            }
        };

        let kept = clean_pages(kept);
        if !kept.is_empty() {
            let tables = tables_or_markdown(Vec::new(), &kept);
            outcome.degraded = Some(ExtractionResult::from_pages(
                kept,
                tables,
                StrategySource::Inline,
                note,
            ));
        }
        outcome
    }

    /// ONLINE_OCR_ATTEMPT.
    async fn online_attempt(
        &self,
        bytes: Option<&[u8]>,
        estimate: Option<usize>,
        local_pages: &[PageText],
        diagnostics: &mut Diagnostics,
        last_failure: &mut String,
    ) -> Option<ExtractionResult> {
        if !self.config.is_enabled(StrategySource::Online) {
            return None;
        }
        let (Some(ocr), Some(bytes)) = (self.ocr, bytes) else {
            let reason = if self.ocr.is_none() {
                "no OCR engine configured"
            } else {
                "document bytes unavailable"
            };
            diagnostics.push(PipelineWarning::StrategySkipped {
                strategy: StrategySource::Online,
                reason: reason.into(),
            });
            return None;
        };

        let limit = self.config.inline_page_limit;
        let selected = select_pages_limited(
            local_pages,
            &self.config.target_keywords,
            self.config.max_selected_pages.min(limit),
        );
        let within_limit = estimate.map_or(true, |n| n <= limit);
        if !within_limit && selected.is_empty() {
            diagnostics.push(PipelineWarning::StrategySkipped {
                strategy: StrategySource::Online,
                reason: format!(
                    "estimated {} pages exceed the {limit}-page limit and no pages were targeted",
                    estimate.unwrap_or_default()
                ),
            });
            return None;
        }

        let selector = online_selector(estimate, &selected, limit);
        info!(pages = ?selector, "Running online OCR");
        let call_secs = self.config.call_timeout_secs;
        let first = with_timeout(call_secs, ocr.process_inline(bytes, selector.as_deref())).await;

        let (output, covered, resampled) = match first {
            Ok(out) => (out, selector, false),
            Err(BackendError::PageLimitExceeded { detail }) => {
                let pages = resample(estimate, limit);
                debug!("Page limit rejected the request: {}", detail);
                diagnostics.push(PipelineWarning::OnlineResampled {
                    pages: pages.clone(),
                });
                match with_timeout(call_secs, ocr.process_inline(bytes, Some(&pages))).await {
                    Ok(out) => (out, Some(pages), true),
                    Err(e) => {
                        *last_failure = format!("online OCR failed: {e}");
                        diagnostics.push(PipelineWarning::OnlineFailed {
                            detail: e.to_string(),
                        });
                        return None;
                    }
                }
            }
            Err(e) => {
                *last_failure = format!("online OCR failed: {e}");
                diagnostics.push(PipelineWarning::OnlineFailed {
                    detail: e.to_string(),
                });
                return None;
            }
        };

        let pages = clean_pages(output.pages);
        if pages.is_empty() {
            *last_failure = "online OCR returned no text".to_string();
            diagnostics.push(PipelineWarning::OnlineFailed {
                detail: "no text in response".into(),
            });
            return None;
        }

        let partial = match (&covered, estimate) {
            (Some(c), Some(n)) => c.len() < n,
            _ => false,
        };
        let note = if resampled || partial {
            let covered = covered.unwrap_or_default();
            format!(
                "online OCR covered {} of {} pages: {:?}",
                covered.len(),
                estimate.map_or_else(|| "?".to_string(), |n| n.to_string()),
                covered
            )
        } else {
            String::new()
        };
        let tables = tables_or_markdown(output.tables, &pages);
        Some(ExtractionResult::from_pages(
            pages,
            tables,
            StrategySource::Online,
            note,
        ))
    }

    /// BATCH_OCR.
    async fn batch_attempt(
        &self,
        doc: &Document,
        diagnostics: &mut Diagnostics,
        last_failure: &mut String,
    ) -> Option<ExtractionResult> {
        if !self.config.is_enabled(StrategySource::Batch) {
            return None;
        }
        let Some(ocr) = self.ocr else {
            diagnostics.push(PipelineWarning::StrategySkipped {
                strategy: StrategySource::Batch,
                reason: "no OCR engine configured".into(),
            });
            return None;
        };

        match self.run_batch(ocr, doc).await {
            Ok(output) => {
                let pages = clean_pages(output.pages);
                if pages.is_empty() {
                    *last_failure = "batch OCR returned no text".to_string();
                    diagnostics.push(PipelineWarning::BatchFailed {
                        detail: "no text in result documents".into(),
                    });
                    return None;
                }
                let tables = tables_or_markdown(output.tables, &pages);
                Some(ExtractionResult::from_pages(
                    pages,
                    tables,
                    StrategySource::Batch,
                    "",
                ))
            }
            Err(e) => {
                *last_failure = format!("batch OCR failed: {e}");
                diagnostics.push(PipelineWarning::BatchFailed {
                    detail: e.to_string(),
                });
                None
            }
        }
    }

    async fn run_batch(&self, ocr: &dyn OcrEngine, doc: &Document) -> Result<OcrOutput, BackendError> {
        let call_secs = self.config.call_timeout_secs;
        let prefix = batch_prefix(&self.config.batch_output_prefix, doc);

        let job = with_timeout(call_secs, ocr.submit_batch(&doc.uri, &prefix)).await?;
        info!(job = %job.name, prefix = %job.output_prefix, "Waiting for batch OCR");
        with_timeout(self.config.batch_timeout_secs, ocr.wait_batch(&job)).await?;

        // Trailing slash: `.../run-1` must not list `.../run-10`.
        let listing = format!("{}/", job.output_prefix.trim_end_matches('/'));
        let results = with_timeout(call_secs, self.blobs.list(&listing)).await?;
        let results: Vec<String> = results.into_iter().filter(|u| u.ends_with(".json")).collect();
        if results.is_empty() {
            return Err(BackendError::Malformed(format!(
                "no result documents under {}",
                job.output_prefix
            )));
        }

        let mut outputs = Vec::with_capacity(results.len());
        for uri in &results {
            let raw = with_timeout(call_secs, self.blobs.download(uri)).await?;
            let value: serde_json::Value = serde_json::from_slice(&raw)
                .map_err(|e| BackendError::Malformed(format!("{uri}: {e}")))?;
            outputs.push(crate::backend::parse_ocr_document(&value)?);
        }
        debug!(documents = outputs.len(), "Merging batch results");
        Ok(merge_outputs(outputs))
    }
}
