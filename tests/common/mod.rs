//! In-memory collaborators shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use datasheet_catalog::backend::{
    BatchJob, BlobStore, GenerationEngine, GenerationOptions, LiveColumn, LiveIndex, OcrEngine,
    OcrOutput, RelationalStore, TextExtractor, PAGE_BREAK,
};
use datasheet_catalog::{
    BackendError, Blueprint, BrandDictionary, BrandEntry, CatalogError, PageText, RawTable, Recipe,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Route library logs to the test harness; `RUST_LOG` picks the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ── Blob store ───────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put(&self, uri: &str, bytes: impl Into<Vec<u8>>) {
        self.objects
            .lock()
            .unwrap()
            .insert(uri.to_string(), bytes.into());
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn download(&self, uri: &str) -> Result<Vec<u8>, BackendError> {
        self.objects
            .lock()
            .unwrap()
            .get(uri)
            .cloned()
            .ok_or_else(|| BackendError::NotFound {
                uri: uri.to_string(),
            })
    }

    async fn list(&self, prefix_uri: &str) -> Result<Vec<String>, BackendError> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix_uri))
            .cloned()
            .collect())
    }
}

// ── Text extractor ───────────────────────────────────────────────────────────

pub struct FakeTextExtractor {
    result: Result<String, BackendError>,
    delay: Option<Duration>,
}

impl FakeTextExtractor {
    /// Pages joined with form feeds.
    pub fn pages(pages: &[String]) -> Arc<Self> {
        let sep = PAGE_BREAK.to_string();
        Arc::new(Self {
            result: Ok(pages.join(&sep)),
            delay: None,
        })
    }

    pub fn failing(detail: &str) -> Arc<Self> {
        Arc::new(Self {
            result: Err(BackendError::Failed(detail.to_string())),
            delay: None,
        })
    }

    pub fn slow(pages: &[String], delay: Duration) -> Arc<Self> {
        let sep = PAGE_BREAK.to_string();
        Arc::new(Self {
            result: Ok(pages.join(&sep)),
            delay: Some(delay),
        })
    }
}

#[async_trait]
impl TextExtractor for FakeTextExtractor {
    async fn extract_text(&self, _bytes: &[u8]) -> Result<String, BackendError> {
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        self.result.clone()
    }
}

// ── OCR engine ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    /// Write one result document per call to `wait_batch`.
    Succeed,
    /// `wait_batch` fails.
    Fail,
    /// `wait_batch` never returns.
    Hang,
}

pub struct FakeOcr {
    pub processor: String,
    pub page_limit: usize,
    pub pages: Vec<PageText>,
    pub tables: Vec<RawTable>,
    pub inline_delay: Option<Duration>,
    pub inline_error: Option<BackendError>,
    pub batch_mode: BatchMode,
    pub blobs: Arc<MemoryBlobStore>,
    pub inline_calls: Mutex<Vec<Option<Vec<usize>>>>,
    pub batch_calls: Mutex<Vec<String>>,
}

impl FakeOcr {
    pub fn new(blobs: Arc<MemoryBlobStore>, pages: Vec<PageText>) -> Self {
        Self {
            processor: "projects/test/processors/ocr".into(),
            page_limit: 15,
            pages,
            tables: Vec::new(),
            inline_delay: None,
            inline_error: None,
            batch_mode: BatchMode::Succeed,
            blobs,
            inline_calls: Mutex::new(Vec::new()),
            batch_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_tables(mut self, tables: Vec<RawTable>) -> Self {
        self.tables = tables;
        self
    }

    pub fn inline_calls(&self) -> Vec<Option<Vec<usize>>> {
        self.inline_calls.lock().unwrap().clone()
    }

    pub fn batch_calls(&self) -> Vec<String> {
        self.batch_calls.lock().unwrap().clone()
    }

    fn output_for(&self, selected: Option<&[usize]>) -> OcrOutput {
        let keep = |p: usize| selected.map_or(true, |s| s.contains(&p));
        OcrOutput {
            pages: self.pages.iter().filter(|p| keep(p.page)).cloned().collect(),
            tables: self
                .tables
                .iter()
                .filter(|t| t.page.map_or(true, keep))
                .cloned()
                .collect(),
        }
    }

    fn result_document(&self) -> Value {
        let pages: Vec<Value> = self
            .pages
            .iter()
            .map(|p| {
                let tables: Vec<Value> = self
                    .tables
                    .iter()
                    .filter(|t| t.page == Some(p.page))
                    .map(|t| json!({"headerRows": t.header_rows, "bodyRows": t.body_rows}))
                    .collect();
                json!({"pageNumber": p.page, "text": p.text, "tables": tables})
            })
            .collect();
        json!({"document": {"pages": pages}})
    }
}

#[async_trait]
impl OcrEngine for FakeOcr {
    fn processor(&self) -> &str {
        &self.processor
    }

    async fn process_inline(
        &self,
        _bytes: &[u8],
        pages: Option<&[usize]>,
    ) -> Result<OcrOutput, BackendError> {
        self.inline_calls
            .lock()
            .unwrap()
            .push(pages.map(|p| p.to_vec()));
        if let Some(d) = self.inline_delay {
            tokio::time::sleep(d).await;
        }
        if let Some(e) = &self.inline_error {
            return Err(e.clone());
        }
        let requested = pages.map_or(self.pages.len(), |p| p.len());
        if requested > self.page_limit {
            return Err(BackendError::PageLimitExceeded {
                detail: format!("{requested} pages > {}", self.page_limit),
            });
        }
        Ok(self.output_for(pages))
    }

    async fn submit_batch(&self, uri: &str, output_prefix: &str) -> Result<BatchJob, BackendError> {
        self.batch_calls.lock().unwrap().push(uri.to_string());
        Ok(BatchJob {
            name: "operations/batch-1".into(),
            output_prefix: output_prefix.to_string(),
        })
    }

    async fn wait_batch(&self, job: &BatchJob) -> Result<(), BackendError> {
        match self.batch_mode {
            BatchMode::Succeed => {
                let doc = self.result_document();
                self.blobs
                    .put(&format!("{}/0/result-0.json", job.output_prefix), doc.to_string());
                self.blobs
                    .put(&format!("{}/0/manifest.txt", job.output_prefix), "ignored");
                Ok(())
            }
            BatchMode::Fail => Err(BackendError::Failed("job state FAILED".into())),
            BatchMode::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }
}

// ── Generation engine ────────────────────────────────────────────────────────

pub struct FakeGeneration {
    pub model: String,
    pub reply: Value,
    pub delay: Option<Duration>,
    pub payloads: Mutex<Vec<Value>>,
}

impl FakeGeneration {
    pub fn replying(reply: Value) -> Arc<Self> {
        Arc::new(Self {
            model: "fake-model".into(),
            reply,
            delay: None,
            payloads: Mutex::new(Vec::new()),
        })
    }

    pub fn slow(reply: Value, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            model: "fake-model".into(),
            reply,
            delay: Some(delay),
            payloads: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl GenerationEngine for FakeGeneration {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate_json(
        &self,
        _system: &str,
        payload: &Value,
        _options: GenerationOptions,
    ) -> Result<Value, BackendError> {
        self.payloads.lock().unwrap().push(payload.clone());
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        Ok(self.reply.clone())
    }
}

// ── Relational store ─────────────────────────────────────────────────────────

static RE_ADD_COLUMN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^ALTER TABLE "([^"]+)" ADD COLUMN IF NOT EXISTS "([^"]+)" (.+)$"#).unwrap()
});
static RE_ALTER_TYPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^ALTER TABLE "([^"]+)" ALTER COLUMN "([^"]+)" TYPE (\w+)"#).unwrap());
static RE_CREATE_INDEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^CREATE INDEX IF NOT EXISTS "([^"]+)" ON "([^"]+)""#).unwrap());
static RE_DROP_INDEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^DROP INDEX IF EXISTS "([^"]+)""#).unwrap());

/// `information_schema`-style `(data_type, udt_name)` of a storage type.
pub fn live_type_of(storage: &str) -> (String, String) {
    if storage.starts_with("vector") {
        return ("USER-DEFINED".into(), "vector".into());
    }
    (storage.to_string(), storage.to_string())
}

#[derive(Default)]
pub struct MemoryStore {
    pub columns: Mutex<BTreeMap<String, Vec<LiveColumn>>>,
    pub indexes: Mutex<BTreeMap<String, Vec<LiveIndex>>>,
    pub executed: Mutex<Vec<String>>,
    /// Fail the n-th (0-based) call to `execute`.
    pub fail_on: Option<usize>,
    pub blueprints: BTreeMap<String, Blueprint>,
    pub recipes: Vec<Recipe>,
    pub recipes_fail: bool,
    pub brands: BrandDictionary,
}

impl MemoryStore {
    pub fn with_table(table: &str, columns: &[(&str, &str)]) -> Self {
        let store = Self::default();
        store.columns.lock().unwrap().insert(
            table.to_string(),
            columns
                .iter()
                .map(|(name, storage)| {
                    let (data_type, udt) = live_type_of(storage);
                    LiveColumn::new(*name, data_type, udt)
                })
                .collect(),
        );
        store
    }

    pub fn add_index(&self, table: &str, name: &str) {
        self.indexes
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .push(LiveIndex {
                name: name.to_string(),
                definition: format!("CREATE INDEX {name} ON {table}"),
            });
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    pub fn column_type(&self, table: &str, column: &str) -> Option<String> {
        self.columns
            .lock()
            .unwrap()
            .get(table)?
            .iter()
            .find(|c| c.name == column)
            .map(|c| c.data_type.clone())
    }

    fn apply(&self, sql: &str) {
        if let Some(c) = RE_ADD_COLUMN.captures(sql) {
            let (data_type, udt) = live_type_of(&c[3]);
            let mut columns = self.columns.lock().unwrap();
            let cols = columns.entry(c[1].to_string()).or_default();
            if !cols.iter().any(|col| col.name == c[2]) {
                cols.push(LiveColumn::new(&c[2], data_type, udt));
            }
        } else if let Some(c) = RE_ALTER_TYPE.captures(sql) {
            let (data_type, udt) = live_type_of(&c[3]);
            let mut columns = self.columns.lock().unwrap();
            if let Some(col) = columns
                .get_mut(&c[1])
                .and_then(|cols| cols.iter_mut().find(|col| col.name == c[2]))
            {
                col.data_type = data_type;
                col.udt_name = udt;
            }
        } else if let Some(c) = RE_CREATE_INDEX.captures(sql) {
            let mut indexes = self.indexes.lock().unwrap();
            let list = indexes.entry(c[2].to_string()).or_default();
            if !list.iter().any(|i| i.name == c[1]) {
                list.push(LiveIndex {
                    name: c[1].to_string(),
                    definition: sql.to_string(),
                });
            }
        } else if let Some(c) = RE_DROP_INDEX.captures(sql) {
            for list in self.indexes.lock().unwrap().values_mut() {
                list.retain(|i| i.name != c[1]);
            }
        }
    }
}

#[async_trait]
impl RelationalStore for MemoryStore {
    async fn columns(&self, table: &str) -> Result<Vec<LiveColumn>, CatalogError> {
        Ok(self
            .columns
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default())
    }

    async fn indexes(&self, table: &str) -> Result<Vec<LiveIndex>, CatalogError> {
        Ok(self
            .indexes
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default())
    }

    async fn execute(&self, sql: &str) -> Result<(), CatalogError> {
        let n = self.executed.lock().unwrap().len();
        if self.fail_on == Some(n) {
            return Err(CatalogError::Store("permission denied for table".into()));
        }
        self.executed.lock().unwrap().push(sql.to_string());
        self.apply(sql);
        Ok(())
    }

    async fn blueprint(&self, family: &str) -> Result<Option<Blueprint>, CatalogError> {
        Ok(self.blueprints.get(family).cloned())
    }

    async fn recipes(&self, family: &str) -> Result<Vec<Recipe>, CatalogError> {
        if self.recipes_fail {
            return Err(CatalogError::Store("connection reset".into()));
        }
        Ok(self
            .recipes
            .iter()
            .filter(|r| r.family == family)
            .cloned()
            .collect())
    }

    async fn brands(&self) -> Result<BrandDictionary, CatalogError> {
        Ok(self.brands.clone())
    }
}

// ── Fixtures ─────────────────────────────────────────────────────────────────

pub const FILLER: &str = "This relay offers high sensitivity and low power consumption in a \
    compact housing suited to signal switching on printed circuit boards. ";

pub fn brands() -> BrandDictionary {
    BrandDictionary::new(vec![
        BrandEntry {
            name: "Omron".into(),
            aliases: vec!["OMRON Corporation".into()],
        },
        BrandEntry {
            name: "Panasonic".into(),
            aliases: vec!["National".into()],
        },
    ])
}

pub fn relay_blueprint() -> Blueprint {
    Blueprint {
        family: "relays".into(),
        fields: vec![],
        variant_keys: vec!["coil_voltage".into()],
    }
}

/// A three-page relay datasheet with an ordering table on page 2.
pub fn relay_datasheet() -> Vec<String> {
    vec![
        format!("OMRON Corporation\nG5V-1 Low Signal Relay\n\n{}", FILLER.repeat(6)),
        format!(
            "Ordering Information\n\n\
             | Model | Coil voltage | Terminal shape | Description |\n\
             |---|---|---|---|\n\
             | G5V-1-DC5 | 5 VDC | PCB | Standard |\n\
             | G5V-1-DC12 | 12 VDC | PCB | Standard |\n\
             | G5V-1-DC24 | 24 VDC | SMD | Surface mount |\n\n{}",
            FILLER.repeat(3)
        ),
        format!("Dimensions\n\n{}", FILLER.repeat(4)),
    ]
}

/// `n` pages of filler, none mentioning an ordering table.
pub fn plain_pages(n: usize) -> Vec<String> {
    (1..=n)
        .map(|i| format!("Section {i}\n{}", FILLER))
        .collect()
}

pub fn page_texts(pages: &[String]) -> Vec<PageText> {
    pages
        .iter()
        .enumerate()
        .map(|(i, t)| PageText {
            page: i + 1,
            text: t.clone(),
        })
        .collect()
}

pub fn relay_table(page: usize) -> RawTable {
    RawTable {
        page: Some(page),
        header_rows: vec![vec![
            "Part No.".into(),
            "Series".into(),
            "Coil voltage".into(),
        ]],
        body_rows: vec![
            vec!["G6K-2F-Y-DC3".into(), "G6K".into(), "3 VDC".into()],
            vec!["G6K-2F-Y-DC5".into(), "G6K".into(), "5 VDC".into()],
            vec!["G6K-2F-Y-DC3".into(), "G6K".into(), "3 VDC".into()],
        ],
    }
}
