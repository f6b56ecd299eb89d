//! Eager single-document ingestion.
//!
//! [`ingest`] runs one document through every stage and returns only when the
//! whole [`IngestionOutput`] is ready. Use [`crate::stream::ingest_stream`] or
//! [`crate::stream::ingest_many`] for several documents at once.
//!
//! Degradation never surfaces as an error here: a failed OCR chain yields an
//! empty extraction, an unresolvable brand yields empty strings, and each
//! step down is recorded in [`IngestionOutput::warnings`]. Only invalid
//! configuration or blueprints are fatal.

use crate::backend::{
    BlobStore, GenerationEngine, OcrEngine, RelationalStore, TextExtractor,
};
use crate::blueprint::{Blueprint, Recipe};
use crate::config::PipelineConfig;
use crate::error::{BackendError, CatalogError, Diagnostics, PipelineWarning};
use crate::model::{BrandDictionary, Document, IngestionOutput, IngestionStats, StrategySource};
use crate::pipeline::resolve::resolve_brand_code;
use crate::pipeline::strategy::{with_timeout, ExtractionEngine};
use crate::pipeline::table::{parse_tables, verify_pages};
use crate::pipeline::variants::{infer_variant_keys, AliasCache};
use crate::progress::{NoopProgressCallback, PipelineStage, ProgressCallback};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info};

/// Shared, read-only collaborators and settings for a run.
///
/// Only `blobs` is mandatory. A missing text extractor or OCR engine skips
/// the strategies that need it; a missing generation engine makes the
/// resolver heuristic; a missing store means no recipes.
pub struct PipelineContext {
    pub blobs: Arc<dyn BlobStore>,
    pub text: Option<Arc<dyn TextExtractor>>,
    pub ocr: Option<Arc<dyn OcrEngine>>,
    pub generation: Option<Arc<dyn GenerationEngine>>,
    pub store: Option<Arc<dyn RelationalStore>>,
    pub brands: BrandDictionary,
    pub config: PipelineConfig,
    pub progress: ProgressCallback,
    alias_cache: Mutex<AliasCache>,
}

impl PipelineContext {
    pub fn new(blobs: Arc<dyn BlobStore>, config: PipelineConfig) -> Self {
        Self {
            blobs,
            text: None,
            ocr: None,
            generation: None,
            store: None,
            brands: BrandDictionary::default(),
            config,
            progress: Arc::new(NoopProgressCallback),
            alias_cache: Mutex::new(AliasCache::new()),
        }
    }

    pub fn with_text_extractor(mut self, text: Arc<dyn TextExtractor>) -> Self {
        self.text = Some(text);
        self
    }

    pub fn with_ocr(mut self, ocr: Arc<dyn OcrEngine>) -> Self {
        self.ocr = Some(ocr);
        self
    }

    pub fn with_generation(mut self, generation: Arc<dyn GenerationEngine>) -> Self {
        self.generation = Some(generation);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn RelationalStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_brands(mut self, brands: BrandDictionary) -> Self {
        self.brands = brands;
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    /// Replace the brand dictionary with the one held by the store.
    pub async fn load_brands(mut self) -> Result<Self, CatalogError> {
        if let Some(store) = &self.store {
            self.brands = store.brands().await?;
            debug!(brands = self.brands.brands.len(), "Brand dictionary loaded");
        }
        Ok(self)
    }

    /// Alias indexes built so far in this run.
    pub fn cached_alias_indexes(&self) -> usize {
        self.alias_cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

/// One document to ingest against a blueprint.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub uri: String,
    pub filename: String,
    pub blueprint: Blueprint,
    pub page_count_hint: Option<usize>,
    /// Extra `{label → value}` rows supplied by the caller, e.g. from a
    /// previous run; they take part in variant inference only.
    pub rows: Vec<BTreeMap<String, String>>,
}

impl IngestRequest {
    pub fn new(uri: impl Into<String>, filename: impl Into<String>, blueprint: Blueprint) -> Self {
        Self {
            uri: uri.into(),
            filename: filename.into(),
            blueprint,
            page_count_hint: None,
            rows: Vec::new(),
        }
    }

    pub fn with_page_count_hint(mut self, pages: usize) -> Self {
        self.page_count_hint = Some(pages);
        self
    }

    pub fn with_rows(mut self, rows: Vec<BTreeMap<String, String>>) -> Self {
        self.rows = rows;
        self
    }

    fn document(&self) -> Document {
        Document {
            uri: self.uri.clone(),
            filename: self.filename.clone(),
            page_count_hint: self.page_count_hint,
        }
    }
}

/// Ingest one datasheet.
///
/// # Errors
/// Returns `Err(CatalogError)` only when the blueprint is invalid or a
/// collaborator is wired in without its identity.
pub async fn ingest(
    ctx: &PipelineContext,
    req: IngestRequest,
) -> Result<IngestionOutput, CatalogError> {
    let uri = req.uri.clone();
    ctx.progress.on_document_start(&uri);
    match run(ctx, req).await {
        Ok(output) => {
            ctx.progress.on_document_complete(&uri, &output);
            Ok(output)
        }
        Err(e) => {
            ctx.progress.on_document_error(&uri, &e.to_string());
            Err(e)
        }
    }
}

async fn run(ctx: &PipelineContext, req: IngestRequest) -> Result<IngestionOutput, CatalogError> {
    let total_start = Instant::now();
    req.blueprint.validate()?;
    let doc = req.document();
    let blueprint = &req.blueprint;
    let config = &ctx.config;
    let mut diagnostics = Diagnostics::new();
    info!(uri = %doc.uri, family = %blueprint.family, "Starting ingestion");

    // ── Step 1: Extraction ───────────────────────────────────────────────
    ctx.progress.on_stage(&doc.uri, PipelineStage::Extraction);
    let extraction_start = Instant::now();
    let engine = ExtractionEngine::new(
        ctx.blobs.as_ref(),
        ctx.text.as_deref(),
        ctx.ocr.as_deref(),
        config,
    )?;
    let extraction = engine.run(&doc, &mut diagnostics).await;
    let extraction_ms = extraction_start.elapsed().as_millis() as u64;
    info!(
        uri = %doc.uri,
        source = %extraction.strategy_source,
        pages = extraction.pages.len(),
        tables = extraction.tables.len(),
        "Extraction finished in {}ms",
        extraction_ms
    );

    // ── Step 2: Tables ───────────────────────────────────────────────────
    ctx.progress.on_stage(&doc.uri, PipelineStage::Tables);
    let mut rows = parse_tables(&extraction.tables);
    verify_pages(&mut rows, &extraction.pages);
    if rows.is_empty() && extraction.strategy_source != StrategySource::Empty {
        diagnostics.push(PipelineWarning::NoRows {
            tables: extraction.tables.len(),
        });
    }

    // ── Step 3: Resolution ───────────────────────────────────────────────
    ctx.progress.on_stage(&doc.uri, PipelineStage::Resolution);
    let resolution_start = Instant::now();
    let resolution = resolve_brand_code(
        &extraction.text,
        &ctx.brands,
        ctx.generation.as_deref(),
        config,
        &mut diagnostics,
    )
    .await?;
    let resolution_ms = resolution_start.elapsed().as_millis() as u64;

    // ── Step 4: Variants ─────────────────────────────────────────────────
    ctx.progress.on_stage(&doc.uri, PipelineStage::Variants);
    let recipes = load_recipes(ctx, &blueprint.family, &mut diagnostics).await;
    let index = {
        let mut cache = ctx.alias_cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.get_or_build(blueprint, &resolution.brand, &resolution.series, &recipes)
    };
    let inference = infer_variant_keys(
        &index,
        &blueprint.variant_keys,
        &extraction.tables,
        &req.rows,
        config.variant_threshold,
    );
    debug!(
        detected = ?inference.detected,
        new = ?inference.new_keys,
        "Variant keys inferred"
    );

    let stats = IngestionStats {
        pages: extraction.pages.len(),
        tables: extraction.tables.len(),
        rows: rows.len(),
        extraction_ms,
        resolution_ms,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };
    info!(
        uri = %doc.uri,
        brand = %resolution.brand,
        code = %resolution.code,
        rows = stats.rows,
        warnings = diagnostics.warnings().len(),
        "Ingestion complete in {}ms",
        stats.total_duration_ms
    );

    Ok(IngestionOutput {
        document: doc,
        brand: resolution.brand,
        code: resolution.code,
        series: resolution.series,
        resolution_source: resolution.source,
        rows,
        new_variant_keys: inference.new_keys,
        detected_variant_keys: inference.detected,
        strategy_source: extraction.strategy_source,
        note: extraction.note,
        warnings: diagnostics.into_vec(),
        stats,
    })
}

/// Recipes of `family`; empty (with a warning) when the lookup fails.
async fn load_recipes(
    ctx: &PipelineContext,
    family: &str,
    diagnostics: &mut Diagnostics,
) -> Vec<Recipe> {
    let Some(store) = &ctx.store else {
        return Vec::new();
    };
    let lookup = with_timeout(ctx.config.call_timeout_secs, async {
        store
            .recipes(family)
            .await
            .map_err(|e| BackendError::Failed(e.to_string()))
    })
    .await;
    match lookup {
        Ok(recipes) => recipes,
        Err(e) => {
            diagnostics.push(PipelineWarning::RecipeLookupFailed {
                detail: e.to_string(),
            });
            Vec::new()
        }
    }
}
