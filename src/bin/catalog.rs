//! CLI binary for datasheet-catalog.
//!
//! A thin shim over the library crate: maps flags to `PipelineConfig`, wires
//! the concrete collaborators and prints results.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use datasheet_catalog::backend::{
    HttpOcrEngine, LlmGenerationEngine, LocalBlobStore, PdfiumTextExtractor, PgStore,
    RelationalStore,
};
use datasheet_catalog::schema::{self, family_table, StatementKind};
use datasheet_catalog::{
    ingest_many, Blueprint, BrandDictionary, IngestRequest, IngestionOutput, PipelineConfig,
    PipelineContext, PipelineProgressCallback, PipelineStage, StrategySource,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One bar over all documents; per-document lines are printed above it.
/// Documents may finish out of order.
struct CliProgressCallback {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new(total: usize) -> Arc<Self> {
        let bar = ProgressBar::new(total as u64);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:32.green/238}] {pos}/{len} docs  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Ingesting");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
        })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
        let total = self.bar.length().unwrap_or(0) as usize;
        let failed = self.errors.load(Ordering::SeqCst);
        if failed == 0 {
            eprintln!("{} {} document(s) ingested", green("✔"), bold(&total.to_string()));
        } else {
            eprintln!(
                "{} {}/{} document(s) ingested  ({} failed)",
                yellow("⚠"),
                total.saturating_sub(failed),
                total,
                red(&failed.to_string())
            );
        }
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_stage(&self, uri: &str, stage: PipelineStage) {
        self.bar.set_message(format!("{} {}", stage.as_str(), dim(uri)));
    }

    fn on_document_complete(&self, uri: &str, output: &IngestionOutput) {
        let marker = if output.strategy_source == StrategySource::Empty {
            yellow("○")
        } else {
            green("✓")
        };
        self.bar.println(format!(
            "  {} {}  {} {}  {}",
            marker,
            uri,
            bold(if output.brand.is_empty() { "?" } else { output.brand.as_str() }),
            if output.code.is_empty() { "?" } else { output.code.as_str() },
            dim(&format!(
                "{} rows via {}, {} warning(s)",
                output.rows.len(),
                output.strategy_source,
                output.warnings.len()
            )),
        ));
        self.bar.inc(1);
    }

    fn on_document_error(&self, uri: &str, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        self.bar
            .println(format!("  {} {}  {}", red("✗"), uri, red(error)));
        self.bar.inc(1);
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Ingest two datasheets stored under ./blobs/datasheets/
  catalog ingest --family relays --blueprint relays.json \
      file://datasheets/g5v.pdf file://datasheets/g6k.pdf

  # Same, with OCR fallback and brand dictionary from PostgreSQL
  catalog ingest --family relays --database-url postgres://localhost/catalog \
      --ocr-endpoint https://ocr.internal/v1 --ocr-processor relays-ocr \
      file://datasheets/g5v.pdf

  # Show which DDL a blueprint change needs, then apply it
  catalog reconcile --family relays --database-url postgres://localhost/catalog
  catalog reconcile --family relays --database-url postgres://localhost/catalog --apply

ENVIRONMENT VARIABLES:
  DATABASE_URL            PostgreSQL connection string
  OCR_ENDPOINT            Base URL of the OCR engine
  OCR_PROCESSOR           OCR processor identity
  OCR_TOKEN               Bearer token for the OCR engine
  CATALOG_LLM_PROVIDER    LLM provider (openai, anthropic, gemini, ollama, azure)
  CATALOG_MODEL           LLM model ID
  OPENAI_API_KEY          Used when no provider is named
  RUST_LOG                Overrides --verbose / --quiet
"#;

/// Turn product datasheet PDFs into structured catalog records.
#[derive(Parser, Debug)]
#[command(
    name = "catalog",
    version,
    about = "Turn product datasheet PDFs into structured catalog records",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "CATALOG_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "CATALOG_QUIET")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest datasheets and print the extracted catalog records.
    Ingest(IngestArgs),
    /// Diff a family table against its blueprint; optionally apply the DDL.
    Reconcile(ReconcileArgs),
}

#[derive(Args, Debug)]
struct IngestArgs {
    /// Blob URIs (`scheme://bucket/object`) of the datasheets.
    #[arg(required = true)]
    uris: Vec<String>,

    /// Product family the datasheets belong to.
    #[arg(long, env = "CATALOG_FAMILY")]
    family: String,

    /// Blueprint JSON file; read from the database when omitted.
    #[arg(long, env = "CATALOG_BLUEPRINT")]
    blueprint: Option<PathBuf>,

    /// Brand dictionary JSON file; read from the database when omitted.
    #[arg(long, env = "CATALOG_BRANDS")]
    brands: Option<PathBuf>,

    /// Directory that `scheme://bucket/object` URIs resolve under.
    #[arg(long, env = "CATALOG_BLOB_ROOT", default_value = ".")]
    blob_root: PathBuf,

    /// Page count to assume for every document, when known.
    #[arg(long)]
    page_count: Option<usize>,

    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    #[arg(long, env = "OCR_ENDPOINT")]
    ocr_endpoint: Option<String>,

    #[arg(long, env = "OCR_PROCESSOR")]
    ocr_processor: Option<String>,

    #[arg(long, env = "OCR_TOKEN", hide_env_values = true)]
    ocr_token: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "CATALOG_LLM_PROVIDER")]
    provider: Option<String>,

    /// LLM model ID.
    #[arg(long, env = "CATALOG_MODEL")]
    model: Option<String>,

    /// Resolve brand/code heuristically, without an LLM.
    #[arg(long)]
    no_llm: bool,

    /// Skip local pdfium text extraction.
    #[arg(long)]
    no_inline: bool,

    /// Directory holding libpdfium.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_dir: Option<PathBuf>,

    /// Per-call timeout in seconds.
    #[arg(long, env = "CATALOG_CALL_TIMEOUT", default_value_t = 60)]
    call_timeout: u64,

    /// Batch OCR timeout in seconds.
    #[arg(long, env = "CATALOG_BATCH_TIMEOUT", default_value_t = 600)]
    batch_timeout: u64,

    /// Page ceiling of inline/online extraction.
    #[arg(long, env = "CATALOG_INLINE_PAGE_LIMIT", default_value_t = 15)]
    inline_page_limit: usize,

    /// Where batch OCR writes its result documents.
    #[arg(long, env = "CATALOG_BATCH_OUTPUT", default_value = "file://ocr-output/batch")]
    batch_output: String,

    /// Documents processed at once.
    #[arg(short, long, env = "CATALOG_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Output structured JSON instead of a summary.
    #[arg(long)]
    json: bool,

    /// Disable the progress bar.
    #[arg(long, env = "CATALOG_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Args, Debug)]
struct ReconcileArgs {
    /// Product family whose table is reconciled.
    #[arg(long, env = "CATALOG_FAMILY")]
    family: String,

    /// Table name; defaults to the normalised family name.
    #[arg(long)]
    table: Option<String>,

    /// Blueprint JSON file; read from the database when omitted.
    #[arg(long, env = "CATALOG_BLUEPRINT")]
    blueprint: Option<PathBuf>,

    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Execute the `apply` statements instead of only printing them.
    #[arg(long)]
    apply: bool,

    /// Output structured JSON instead of SQL.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = match &cli.command {
        Command::Ingest(a) => !cli.quiet && !a.no_progress && !a.json,
        Command::Reconcile(_) => false,
    };
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Ingest(args) => run_ingest(args, cli.quiet, show_progress).await,
        Command::Reconcile(args) => run_reconcile(args, cli.quiet).await,
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {what} from {path:?}"))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid {what} JSON in {path:?}"))
}

async fn load_blueprint(
    family: &str,
    path: Option<&Path>,
    store: Option<&PgStore>,
) -> Result<Option<Blueprint>> {
    if let Some(path) = path {
        let mut bp: Blueprint = read_json(path, "blueprint").await?;
        if bp.family.trim().is_empty() {
            bp.family = family.to_string();
        }
        return Ok(Some(bp));
    }
    match store {
        Some(store) => store
            .blueprint(family)
            .await
            .with_context(|| format!("Failed to load blueprint for '{family}'")),
        None => Ok(None),
    }
}

async fn run_ingest(args: IngestArgs, quiet: bool, show_progress: bool) -> Result<()> {
    let config = PipelineConfig::builder()
        .call_timeout_secs(args.call_timeout)
        .batch_timeout_secs(args.batch_timeout)
        .inline_page_limit(args.inline_page_limit)
        .batch_output_prefix(args.batch_output.clone())
        .concurrency(args.concurrency)
        .build()
        .context("Invalid configuration")?;

    let store = match &args.database_url {
        Some(url) => Some(Arc::new(
            PgStore::connect(url)
                .await
                .context("Failed to connect to the database")?,
        )),
        None => None,
    };

    let blueprint = load_blueprint(&args.family, args.blueprint.as_deref(), store.as_deref())
        .await?
        .unwrap_or_else(|| Blueprint {
            family: args.family.clone(),
            fields: Vec::new(),
            variant_keys: Vec::new(),
        });

    let mut ctx = PipelineContext::new(Arc::new(LocalBlobStore::new(&args.blob_root)), config);

    if !args.no_inline {
        let mut extractor = PdfiumTextExtractor::new();
        if let Some(dir) = &args.pdfium_dir {
            extractor = extractor.with_library_dir(dir);
        }
        ctx = ctx.with_text_extractor(Arc::new(extractor));
    }

    if let (Some(endpoint), Some(processor)) = (&args.ocr_endpoint, &args.ocr_processor) {
        let mut engine = HttpOcrEngine::new(endpoint, processor, args.call_timeout)
            .context("Invalid OCR engine settings")?;
        if let Some(token) = &args.ocr_token {
            engine = engine.with_bearer_token(token);
        }
        ctx = ctx.with_ocr(Arc::new(engine));
    }

    if !args.no_llm {
        let engine = LlmGenerationEngine::resolve(args.provider.as_deref(), args.model.as_deref())
            .context("Failed to set up the LLM provider (use --no-llm to skip)")?;
        ctx = ctx.with_generation(Arc::new(engine));
    }

    if let Some(store) = &store {
        ctx = ctx.with_store(store.clone());
    }
    ctx = match &args.brands {
        Some(path) => {
            let brands: BrandDictionary = read_json(path, "brand dictionary").await?;
            ctx.with_brands(brands)
        }
        None => ctx
            .load_brands()
            .await
            .context("Failed to load the brand dictionary")?,
    };

    let progress = show_progress.then(|| CliProgressCallback::new(args.uris.len()));
    if let Some(cb) = &progress {
        ctx = ctx.with_progress(cb.clone());
    }

    let requests: Vec<IngestRequest> = args
        .uris
        .iter()
        .map(|uri| {
            let filename = uri.rsplit('/').next().unwrap_or(uri).to_string();
            let req = IngestRequest::new(uri.clone(), filename, blueprint.clone());
            match args.page_count {
                Some(n) => req.with_page_count_hint(n),
                None => req,
            }
        })
        .collect();

    let results = ingest_many(Arc::new(ctx), requests).await;
    if let Some(cb) = &progress {
        cb.finish();
    }

    let mut outputs = Vec::new();
    let mut failures = 0usize;
    for (uri, result) in args.uris.iter().zip(results) {
        match result {
            Ok(out) => outputs.push(out),
            Err(e) => {
                failures += 1;
                if !show_progress {
                    eprintln!("{} {}: {e}", red("✗"), uri);
                }
            }
        }
    }

    if args.json {
        let json = serde_json::to_string_pretty(&outputs).context("Failed to serialise output")?;
        println!("{json}");
    } else if !quiet {
        for out in &outputs {
            print_summary(out);
        }
    }

    if failures > 0 && outputs.is_empty() {
        bail!("all {failures} document(s) failed");
    }
    Ok(())
}

fn print_summary(out: &IngestionOutput) {
    println!("{}", bold(&out.document.uri));
    println!("  brand:     {}", out.brand);
    println!("  code:      {}", out.code);
    println!("  series:    {}", out.series);
    println!(
        "  source:    {} ({} pages, {} tables, {}ms)",
        out.strategy_source, out.stats.pages, out.stats.tables, out.stats.total_duration_ms
    );
    if !out.note.is_empty() {
        println!("  note:      {}", yellow(&out.note));
    }
    println!("  rows:      {}", out.rows.len());
    for row in out.rows.iter().take(10) {
        println!("    {:<24} {:<12} {}", row.code, row.series, dim(&row.desc));
    }
    if out.rows.len() > 10 {
        println!("    {}", dim(&format!("… {} more", out.rows.len() - 10)));
    }
    if !out.detected_variant_keys.is_empty() {
        println!("  variants:  {}", out.detected_variant_keys.join(", "));
    }
    if !out.new_variant_keys.is_empty() {
        println!("  new keys:  {}", green(&out.new_variant_keys.join(", ")));
    }
    for w in &out.warnings {
        println!("  {} {}", yellow("!"), dim(&w.to_string()));
    }
}

async fn run_reconcile(args: ReconcileArgs, quiet: bool) -> Result<()> {
    let store = PgStore::connect(&args.database_url)
        .await
        .context("Failed to connect to the database")?;

    let Some(blueprint) = load_blueprint(&args.family, args.blueprint.as_deref(), Some(&store)).await?
    else {
        bail!("no blueprint found for family '{}'", args.family);
    };
    blueprint.validate().context("Invalid blueprint")?;
    let table = args
        .table
        .clone()
        .unwrap_or_else(|| family_table(&blueprint.family));

    let rec = schema::reconcile(&store, &table, &blueprint.fields, args.apply)
        .await
        .context("Reconciliation failed")?;

    if args.json {
        let json = serde_json::to_string_pretty(&rec).context("Failed to serialise output")?;
        println!("{json}");
        return Ok(());
    }

    for s in &rec.statements {
        match s.kind {
            StatementKind::Apply => println!("{};", s.sql),
            StatementKind::ReviewOnly => println!("{}", yellow(&s.sql)),
        }
    }
    if !quiet {
        let pending = rec.apply_statements().count();
        if pending == 0 {
            eprintln!("{} '{}' matches its blueprint", green("✔"), table);
        } else if args.apply {
            eprintln!("{} {} statement(s) applied to '{}'", green("✔"), rec.applied, table);
        } else {
            eprintln!(
                "{} {} statement(s) pending for '{}' (re-run with --apply)",
                yellow("⚠"),
                pending,
                table
            );
        }
        if !rec.diff.extra.is_empty() {
            let names: Vec<&str> = rec.diff.extra.iter().map(|c| c.name.as_str()).collect();
            eprintln!("  {} columns not in blueprint: {}", dim("·"), names.join(", "));
        }
    }
    Ok(())
}
