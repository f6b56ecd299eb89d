//! End-to-end behaviour of the extraction chain and the ingestion pipeline.

mod common;

use common::*;
use datasheet_catalog::backend::{BlobStore, OcrEngine, TextExtractor};
use datasheet_catalog::pipeline::strategy::ExtractionEngine;
use datasheet_catalog::{
    ingest, ingest_many, BackendError, Diagnostics, Document, ExtractionResult, IngestRequest,
    IngestionOutput, PageText, PipelineConfig, PipelineContext, PipelineProgressCallback,
    PipelineStage, PipelineWarning, Recipe, ResolutionSource, StrategySource,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const URI: &str = "file://datasheets/g5v.pdf";

async fn extract(
    blobs: &MemoryBlobStore,
    text: Option<&dyn TextExtractor>,
    ocr: Option<&dyn OcrEngine>,
    config: &PipelineConfig,
    doc: &Document,
) -> (ExtractionResult, Vec<PipelineWarning>) {
    let engine = ExtractionEngine::new(blobs as &dyn BlobStore, text, ocr, config).unwrap();
    let mut diagnostics = Diagnostics::new();
    let result = engine.run(doc, &mut diagnostics).await;
    (result, diagnostics.into_vec())
}

fn inline(text: &Arc<FakeTextExtractor>) -> Option<&dyn TextExtractor> {
    Some(text.as_ref())
}

fn online(ocr: &FakeOcr) -> Option<&dyn OcrEngine> {
    Some(ocr)
}

fn stored_blobs() -> Arc<MemoryBlobStore> {
    let blobs = MemoryBlobStore::new();
    blobs.put(URI, b"%PDF-1.7 fake".to_vec());
    blobs
}

fn doc() -> Document {
    Document::new(URI, "g5v.pdf")
}

fn skipped(warnings: &[PipelineWarning], strategy: StrategySource) -> bool {
    warnings.iter().any(|w| {
        matches!(w, PipelineWarning::StrategySkipped { strategy: s, .. } if *s == strategy)
    })
}

// ── Extraction chain ─────────────────────────────────────────────────────────

#[tokio::test]
async fn rich_inline_text_is_accepted() {
    let blobs = stored_blobs();
    let text = FakeTextExtractor::pages(&relay_datasheet());
    let config = PipelineConfig::default();

    let (result, warnings) = extract(&blobs, inline(&text), None, &config, &doc()).await;

    assert_eq!(result.strategy_source, StrategySource::Inline);
    assert!(result.note.is_empty());
    assert_eq!(result.pages.len(), 3);
    assert_eq!(result.tables.len(), 1);
    assert!(warnings.is_empty(), "unexpected warnings: {warnings:?}");
}

#[tokio::test]
async fn forty_pages_over_the_limit_go_to_batch() {
    let blobs = stored_blobs();
    let pages = plain_pages(40);
    let text = FakeTextExtractor::pages(&pages);
    let ocr = FakeOcr::new(blobs.clone(), page_texts(&pages));
    let config = PipelineConfig::default();

    let (result, warnings) = extract(&blobs, inline(&text), online(&ocr), &config, &doc()).await;

    assert_eq!(result.strategy_source, StrategySource::Batch);
    assert_eq!(result.pages.len(), 40);
    assert!(result.note.is_empty());
    assert!(warnings.contains(&PipelineWarning::InlineTruncated { kept: 15, total: 40 }));
    assert!(skipped(&warnings, StrategySource::Online));
    assert!(ocr.inline_calls().is_empty());
    assert_eq!(ocr.batch_calls(), vec![URI.to_string()]);
}

#[tokio::test]
async fn forty_pages_without_ocr_are_never_a_silent_partial_result() {
    let blobs = stored_blobs();
    let text = FakeTextExtractor::pages(&plain_pages(40));
    let config = PipelineConfig::default();

    let (result, warnings) = extract(&blobs, inline(&text), None, &config, &doc()).await;

    assert_eq!(result.strategy_source, StrategySource::Inline);
    assert_eq!(result.pages.len(), 15);
    assert!(result.note.contains("truncated"), "note: {}", result.note);
    assert!(skipped(&warnings, StrategySource::Online));
    assert!(skipped(&warnings, StrategySource::Batch));
}

#[tokio::test]
async fn targeted_pages_go_online_even_for_long_documents() {
    let blobs = stored_blobs();
    let mut pages = plain_pages(40);
    pages[21] = format!("Ordering information\nPart number list\n{}", FILLER);
    let text = FakeTextExtractor::pages(&pages);
    let ocr = FakeOcr::new(blobs.clone(), page_texts(&pages)).with_tables(vec![relay_table(22)]);
    let config = PipelineConfig::default();

    let (result, _) = extract(&blobs, inline(&text), online(&ocr), &config, &doc()).await;

    assert_eq!(result.strategy_source, StrategySource::Online);
    assert_eq!(ocr.inline_calls(), vec![Some(vec![22])]);
    assert_eq!(result.pages.len(), 1);
    assert_eq!(result.tables.len(), 1);
    assert!(result.note.contains("covered 1 of 40"), "note: {}", result.note);
    assert!(ocr.batch_calls().is_empty());
}

#[tokio::test]
async fn page_limit_rejection_resamples_once() {
    let blobs = stored_blobs();
    let ocr = FakeOcr::new(blobs.clone(), page_texts(&plain_pages(30)));
    let config = PipelineConfig::default();

    let (result, warnings) = extract(&blobs, None, online(&ocr), &config, &doc()).await;

    let sample: Vec<usize> = (1..=15).collect();
    assert_eq!(result.strategy_source, StrategySource::Online);
    assert_eq!(result.pages.len(), 15);
    assert!(!result.note.is_empty());
    assert_eq!(ocr.inline_calls(), vec![None, Some(sample.clone())]);
    assert!(warnings.contains(&PipelineWarning::OnlineResampled { pages: sample }));
    assert!(skipped(&warnings, StrategySource::Inline));
}

#[tokio::test]
async fn online_timeout_falls_through_to_batch() {
    let blobs = stored_blobs();
    let mut ocr = FakeOcr::new(blobs.clone(), page_texts(&relay_datasheet()));
    ocr.inline_delay = Some(Duration::from_secs(5));
    let config = PipelineConfig::builder().call_timeout_secs(1).build().unwrap();

    let (result, warnings) = extract(&blobs, None, online(&ocr), &config, &doc()).await;

    assert_eq!(result.strategy_source, StrategySource::Batch);
    assert!(warnings.contains(&PipelineWarning::OnlineFailed {
        detail: "timed out after 1s".into()
    }));
}

#[tokio::test]
async fn inline_timeout_is_an_ordinary_failure() {
    let blobs = stored_blobs();
    let text = FakeTextExtractor::slow(&relay_datasheet(), Duration::from_secs(5));
    let config = PipelineConfig::builder().call_timeout_secs(1).build().unwrap();

    let (result, warnings) = extract(&blobs, inline(&text), None, &config, &doc()).await;

    assert_eq!(result.strategy_source, StrategySource::Empty);
    assert!(result.note.contains("timed out"), "note: {}", result.note);
    assert!(warnings.contains(&PipelineWarning::InlineFailed {
        detail: "timed out after 1s".into()
    }));
}

#[tokio::test]
async fn short_inline_text_is_kept_only_as_a_degraded_last_resort() {
    let blobs = stored_blobs();
    let text = FakeTextExtractor::pages(&["Scanned page stamp".to_string()]);
    let config = PipelineConfig::default();

    let (result, warnings) = extract(&blobs, inline(&text), None, &config, &doc()).await;

    assert_eq!(result.strategy_source, StrategySource::Inline);
    assert!(result.note.contains("below"), "note: {}", result.note);
    assert!(warnings
        .iter()
        .any(|w| matches!(w, PipelineWarning::InlineInsufficient { .. })));
}

#[tokio::test]
async fn every_strategy_failing_yields_empty() {
    init_tracing();
    let blobs = MemoryBlobStore::new();
    let text = FakeTextExtractor::pages(&relay_datasheet());
    let mut ocr = FakeOcr::new(blobs.clone(), Vec::new());
    ocr.batch_mode = BatchMode::Fail;
    let config = PipelineConfig::default();

    let (result, warnings) = extract(&blobs, inline(&text), online(&ocr), &config, &doc()).await;

    assert_eq!(result.strategy_source, StrategySource::Empty);
    assert!(result.text.is_empty());
    assert!(result.pages.is_empty());
    assert!(result.note.starts_with("batch OCR failed"), "note: {}", result.note);
    assert!(matches!(warnings[0], PipelineWarning::DownloadFailed { .. }));
    assert!(skipped(&warnings, StrategySource::Inline));
    assert!(skipped(&warnings, StrategySource::Online));
}

#[tokio::test]
async fn batch_wait_is_bounded() {
    let blobs = stored_blobs();
    let mut ocr = FakeOcr::new(blobs.clone(), page_texts(&relay_datasheet()));
    ocr.inline_error = Some(BackendError::Failed("503 Service Unavailable".into()));
    ocr.batch_mode = BatchMode::Hang;
    let config = PipelineConfig::builder().batch_timeout_secs(1).build().unwrap();

    let (result, _) = extract(&blobs, None, online(&ocr), &config, &doc()).await;

    assert_eq!(result.strategy_source, StrategySource::Empty);
    assert!(result.note.contains("timed out after 1s"), "note: {}", result.note);
}

#[tokio::test]
async fn disabled_strategies_are_not_attempted() {
    let blobs = stored_blobs();
    let text = FakeTextExtractor::pages(&relay_datasheet());
    let ocr = FakeOcr::new(blobs.clone(), page_texts(&relay_datasheet()));
    let config = PipelineConfig::builder()
        .strategies(vec![StrategySource::Batch])
        .build()
        .unwrap();

    let (result, warnings) = extract(&blobs, inline(&text), online(&ocr), &config, &doc()).await;

    assert_eq!(result.strategy_source, StrategySource::Batch);
    assert!(ocr.inline_calls().is_empty());
    assert!(warnings.is_empty());
}

#[tokio::test]
async fn page_count_hint_over_the_limit_degrades_short_text_layers() {
    let blobs = stored_blobs();
    let text = FakeTextExtractor::pages(&plain_pages(10));
    let config = PipelineConfig::default();
    let hinted = doc().with_page_count_hint(40);

    let (result, warnings) = extract(&blobs, inline(&text), None, &config, &hinted).await;

    assert_eq!(result.strategy_source, StrategySource::Inline);
    assert_eq!(result.pages.len(), 10);
    assert_eq!(result.note, "inline text truncated to 10 of 40 pages");
    assert!(warnings.contains(&PipelineWarning::InlineTruncated { kept: 10, total: 40 }));
}

fn batch_only() -> PipelineConfig {
    PipelineConfig::builder()
        .strategies(vec![StrategySource::Batch])
        .build()
        .unwrap()
}

fn single_page(text: &str) -> Vec<PageText> {
    page_texts(&[text.to_string()])
}

#[tokio::test]
async fn same_named_documents_keep_their_own_batch_results() {
    let blobs = MemoryBlobStore::new();
    let a = Document::new("file://bucket-a/datasheet.pdf", "datasheet.pdf");
    let b = Document::new("file://bucket-b/datasheet.pdf", "datasheet.pdf");
    blobs.put(&a.uri, b"%PDF-1.7 a".to_vec());
    blobs.put(&b.uri, b"%PDF-1.7 b".to_vec());
    let ocr_a = FakeOcr::new(blobs.clone(), single_page("DOCUMENT A TEXT"));
    let ocr_b = FakeOcr::new(blobs.clone(), single_page("DOCUMENT B TEXT"));
    let config = batch_only();

    let (first, _) = extract(&blobs, None, online(&ocr_a), &config, &a).await;
    let (second, _) = extract(&blobs, None, online(&ocr_b), &config, &b).await;

    assert_eq!(first.strategy_source, StrategySource::Batch);
    assert_eq!(second.strategy_source, StrategySource::Batch);
    assert!(first.text.contains("DOCUMENT A TEXT"));
    assert!(second.text.contains("DOCUMENT B TEXT"), "text: {}", second.text);
    assert!(!second.text.contains("DOCUMENT A TEXT"));
}

#[tokio::test]
async fn rerun_ignores_earlier_batch_output() {
    let blobs = stored_blobs();
    let stale = FakeOcr::new(blobs.clone(), single_page("FIRST REVISION"));
    let fresh = FakeOcr::new(blobs.clone(), single_page("SECOND REVISION"));
    let config = batch_only();

    extract(&blobs, None, online(&stale), &config, &doc()).await;
    let (result, _) = extract(&blobs, None, online(&fresh), &config, &doc()).await;

    assert!(result.text.contains("SECOND REVISION"), "text: {}", result.text);
    assert!(!result.text.contains("FIRST REVISION"));
}

// ── Ingestion ────────────────────────────────────────────────────────────────

fn terminal_recipe() -> Recipe {
    let mut aliases = BTreeMap::new();
    aliases.insert("terminal".to_string(), vec!["Terminal shape".to_string()]);
    Recipe {
        family: "relays".into(),
        brand: Some("Omron".into()),
        series: None,
        aliases: Some(aliases),
    }
}

fn inline_context(store: MemoryStore) -> PipelineContext {
    PipelineContext::new(stored_blobs(), PipelineConfig::default())
        .with_text_extractor(FakeTextExtractor::pages(&relay_datasheet()))
        .with_store(Arc::new(store))
        .with_brands(brands())
}

fn request() -> IngestRequest {
    IngestRequest::new(URI, "g5v.pdf", relay_blueprint())
}

#[tokio::test]
async fn ingests_an_inline_datasheet_end_to_end() {
    init_tracing();
    let store = MemoryStore {
        recipes: vec![terminal_recipe()],
        ..MemoryStore::default()
    };
    let ctx = inline_context(store);

    let out = ingest(&ctx, request()).await.unwrap();

    assert_eq!(out.strategy_source, StrategySource::Inline);
    assert_eq!(out.brand, "Omron");
    assert_eq!(out.resolution_source, ResolutionSource::Heuristic);
    let codes: Vec<&str> = out.rows.iter().map(|r| r.code.as_str()).collect();
    assert_eq!(codes, vec!["G5V-1-DC5", "G5V-1-DC12", "G5V-1-DC24"]);
    assert!(codes.contains(&out.code.as_str()), "code: {}", out.code);
    assert_eq!(out.rows[0].verified_pages, vec![2]);
    assert!(out.detected_variant_keys.contains(&"coil_voltage".to_string()));
    assert!(out.detected_variant_keys.contains(&"terminal".to_string()));
    assert_eq!(out.new_variant_keys, vec!["terminal".to_string()]);
    assert!(out.warnings.is_empty(), "warnings: {:?}", out.warnings);
    assert_eq!(out.stats.rows, 3);
    assert_eq!(out.stats.pages, 3);
}

#[tokio::test]
async fn generation_answer_is_mapped_to_canonical_candidates() {
    let ctx = inline_context(MemoryStore::default()).with_generation(FakeGeneration::replying(
        json!({"brand": "omron corporation", "code": "g5v-1-dc12", "series": "G5V"}),
    ));

    let out = ingest(&ctx, request()).await.unwrap();

    assert_eq!(out.resolution_source, ResolutionSource::Ai);
    assert_eq!(out.brand, "Omron");
    assert_eq!(out.code, "G5V-1-DC12");
    assert_eq!(out.series, "G5V");
}

#[tokio::test]
async fn fabricated_answers_are_discarded() {
    let ctx = inline_context(MemoryStore::default()).with_generation(FakeGeneration::replying(
        json!({"brand": "Schneider Electric", "code": "RXM2AB2BD"}),
    ));

    let out = ingest(&ctx, request()).await.unwrap();

    assert_eq!(out.resolution_source, ResolutionSource::None);
    assert_eq!(out.brand, "");
    assert_eq!(out.code, "");
    let rejected = out
        .warnings
        .iter()
        .filter(|w| matches!(w, PipelineWarning::RejectedCandidate { .. }))
        .count();
    assert_eq!(rejected, 2);
}

#[tokio::test]
async fn slow_generation_falls_back_to_heuristics() {
    let mut ctx = inline_context(MemoryStore::default()).with_generation(FakeGeneration::slow(
        json!({"brand": "Omron", "code": "G5V-1-DC12"}),
        Duration::from_secs(5),
    ));
    ctx.config = PipelineConfig::builder().call_timeout_secs(1).build().unwrap();

    let out = ingest(&ctx, request()).await.unwrap();

    assert_eq!(out.resolution_source, ResolutionSource::Heuristic);
    assert_eq!(out.brand, "Omron");
    assert!(out.warnings.contains(&PipelineWarning::GenerationFailed {
        detail: "timed out after 1s".into()
    }));
}

#[tokio::test]
async fn recipe_lookup_failure_is_a_warning() {
    let store = MemoryStore {
        recipes: vec![terminal_recipe()],
        recipes_fail: true,
        ..MemoryStore::default()
    };
    let ctx = inline_context(store);

    let out = ingest(&ctx, request()).await.unwrap();

    assert!(out
        .warnings
        .iter()
        .any(|w| matches!(w, PipelineWarning::RecipeLookupFailed { .. })));
    assert_eq!(out.detected_variant_keys, vec!["coil_voltage".to_string()]);
    assert!(out.new_variant_keys.is_empty());
}

#[tokio::test]
async fn caller_rows_take_part_in_variant_inference() {
    let ctx = inline_context(MemoryStore::default());
    let mut blueprint = relay_blueprint();
    blueprint.variant_keys.push("contact_rating".into());
    let rows = vec![
        BTreeMap::from([("Contact rating".to_string(), "1 A".to_string())]),
        BTreeMap::from([("Contact rating".to_string(), "2 A".to_string())]),
    ];
    let req = IngestRequest::new(URI, "g5v.pdf", blueprint).with_rows(rows);

    let out = ingest(&ctx, req).await.unwrap();

    assert!(out
        .detected_variant_keys
        .contains(&"contact_rating".to_string()));
}

#[derive(Default)]
struct CountingProgress {
    starts: AtomicUsize,
    stages: AtomicUsize,
    completes: AtomicUsize,
}

impl PipelineProgressCallback for CountingProgress {
    fn on_document_start(&self, _uri: &str) {
        self.starts.fetch_add(1, Ordering::SeqCst);
    }

    fn on_stage(&self, _uri: &str, _stage: PipelineStage) {
        self.stages.fetch_add(1, Ordering::SeqCst);
    }

    fn on_document_complete(&self, _uri: &str, _output: &IngestionOutput) {
        self.completes.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn ingest_many_keeps_input_order_and_degrades_per_document() {
    let progress = Arc::new(CountingProgress::default());
    let ctx = inline_context(MemoryStore::default()).with_progress(progress.clone());
    let requests = vec![
        request(),
        IngestRequest::new("file://datasheets/missing.pdf", "missing.pdf", relay_blueprint()),
        request(),
    ];

    let results = ingest_many(Arc::new(ctx), requests).await;

    assert_eq!(results.len(), 3);
    let first = results[0].as_ref().unwrap();
    let missing = results[1].as_ref().unwrap();
    assert_eq!(first.strategy_source, StrategySource::Inline);
    assert_eq!(missing.document.uri, "file://datasheets/missing.pdf");
    assert_eq!(missing.strategy_source, StrategySource::Empty);
    assert!(missing.rows.is_empty());
    assert!(matches!(
        missing.warnings[0],
        PipelineWarning::DownloadFailed { .. }
    ));
    assert_eq!(progress.starts.load(Ordering::SeqCst), 3);
    assert_eq!(progress.completes.load(Ordering::SeqCst), 3);
    assert_eq!(progress.stages.load(Ordering::SeqCst), 12);
}

#[tokio::test]
async fn alias_indexes_are_cached_per_run() {
    let ctx = inline_context(MemoryStore::default());
    ingest(&ctx, request()).await.unwrap();
    ingest(&ctx, request()).await.unwrap();
    assert_eq!(ctx.cached_alias_indexes(), 1);
}
