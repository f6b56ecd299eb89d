//! Schema reconciliation: keep a per-family table in line with its blueprint.
//!
//! ## Steps
//!
//! 1. Map each declared field to a storage type ([`storage_type`]).
//! 2. Introspect live columns and diff them against the declaration
//!    ([`diff_fields`]); system columns never count as extra.
//! 3. Emit statements ([`plan_statements`]): `ADD COLUMN IF NOT EXISTS` for
//!    missing fields, a cast for text→numeric and any→text mismatches, and a
//!    review-only comment for every other mismatch.
//! 4. Keep the fixed search index set in place: trigram indexes on the
//!    normalised brand/code/pn columns and a full-text index on the raw
//!    document column, created only when missing and dropped only when stale.
//! 5. Optionally execute the `apply` statements one by one
//!    ([`apply_statements`]). There is no wrapping transaction; a failure
//!    stops the run and reports how many statements already went through.
//!
//! Every statement is idempotent on its own, so two callers reconciling the
//! same table at once do not corrupt it. There is no locking.

use crate::backend::{LiveColumn, LiveIndex, RelationalStore};
use crate::blueprint::{BlueprintField, FieldType};
use crate::error::CatalogError;
use crate::pipeline::normalize::normalize_key;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use tracing::{debug, info, warn};

/// Columns managed outside the blueprint; never reported as extra.
pub const SYSTEM_COLUMNS: &[&str] = &[
    "id",
    "family",
    "brand",
    "brand_norm",
    "code",
    "code_norm",
    "pn",
    "pn_norm",
    "series",
    "raw_document",
    "document_uri",
    "created_at",
    "updated_at",
    "deleted_at",
    "created_by",
    "updated_by",
    "version",
];

/// Columns that get a trigram index when present.
pub const TRIGRAM_COLUMNS: &[&str] = &["brand_norm", "code_norm", "pn_norm"];

/// Column that gets a full-text index when present.
pub const FULL_TEXT_COLUMN: &str = "raw_document";

/// PostgreSQL truncates identifiers to this many bytes.
const MAX_IDENTIFIER_BYTES: usize = 63;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingField {
    pub name: String,
    pub want_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeMismatch {
    pub name: String,
    pub have_type: String,
    pub want_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraColumn {
    pub name: String,
    pub have_type: String,
}

/// Declared fields vs. live columns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDiff {
    pub missing: Vec<MissingField>,
    pub type_mismatch: Vec<TypeMismatch>,
    pub extra: Vec<ExtraColumn>,
}

impl FieldDiff {
    /// No missing columns and no type mismatches.
    pub fn is_aligned(&self) -> bool {
        self.missing.is_empty() && self.type_mismatch.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    Apply,
    ReviewOnly,
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatementKind::Apply => f.write_str("apply"),
            StatementKind::ReviewOnly => f.write_str("review-only"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationStatement {
    pub sql: String,
    pub kind: StatementKind,
    pub reason: String,
}

impl MigrationStatement {
    fn apply(sql: String, reason: impl Into<String>) -> Self {
        Self {
            sql,
            kind: StatementKind::Apply,
            reason: reason.into(),
        }
    }

    fn review(sql: String, reason: impl Into<String>) -> Self {
        Self {
            sql,
            kind: StatementKind::ReviewOnly,
            reason: reason.into(),
        }
    }
}

/// Result of [`plan`] / [`reconcile`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub table: String,
    pub diff: FieldDiff,
    pub statements: Vec<MigrationStatement>,
    /// Statements executed by this call (0 unless applied).
    pub applied: usize,
}

impl Reconciliation {
    pub fn apply_statements(&self) -> impl Iterator<Item = &MigrationStatement> {
        self.statements
            .iter()
            .filter(|s| s.kind == StatementKind::Apply)
    }
}

// ── Types ────────────────────────────────────────────────────────────────────

/// Storage type of a logical field type.
pub fn storage_type(t: FieldType) -> String {
    match t {
        FieldType::Int => "integer".into(),
        FieldType::Numeric => "numeric".into(),
        FieldType::Boolean => "boolean".into(),
        FieldType::Json => "jsonb".into(),
        FieldType::Vector(dims) => format!("vector({dims})"),
        FieldType::Text => "text".into(),
    }
}

/// Canonical storage type of a live column.
///
/// `information_schema` does not report vector dimensions, so vectors come
/// back as plain `vector`.
pub fn live_type(col: &LiveColumn) -> String {
    let data_type = col.data_type.trim().to_lowercase();
    match data_type.as_str() {
        "integer" | "smallint" | "bigint" => "integer".into(),
        "numeric" | "decimal" | "real" | "double precision" => "numeric".into(),
        "boolean" => "boolean".into(),
        "json" | "jsonb" => "jsonb".into(),
        "text" | "character varying" | "character" | "varchar" => "text".into(),
        "user-defined" if col.udt_name.eq_ignore_ascii_case("vector") => "vector".into(),
        "user-defined" => col.udt_name.to_lowercase(),
        _ => data_type,
    }
}

/// Type without its modifier: `vector(384)` → `vector`.
fn type_family(t: &str) -> &str {
    t.split('(').next().unwrap_or(t).trim()
}

/// Double-quote an identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Default table of a product family.
pub fn family_table(family: &str) -> String {
    normalize_key(family)
}

/// Column name of a declared field.
pub fn column_name(field: &BlueprintField) -> String {
    normalize_key(&field.name)
}

fn validate_fields(table: &str, fields: &[BlueprintField]) -> Result<(), CatalogError> {
    let invalid = |detail: String| CatalogError::InvalidBlueprint {
        family: table.to_string(),
        detail,
    };
    if table.trim().is_empty() {
        return Err(invalid("table name is empty".into()));
    }
    let mut seen = BTreeSet::new();
    for field in fields {
        let col = column_name(field);
        if col.is_empty() {
            return Err(invalid(format!("field '{}' has no usable column name", field.name)));
        }
        if !seen.insert(col.clone()) {
            return Err(invalid(format!("two fields map to column '{col}'")));
        }
    }
    Ok(())
}

// ── Diff ─────────────────────────────────────────────────────────────────────

/// Compare declared `fields` against `live` columns.
pub fn diff_fields(live: &[LiveColumn], fields: &[BlueprintField]) -> FieldDiff {
    let live_by_name: HashMap<&str, &LiveColumn> =
        live.iter().map(|c| (c.name.as_str(), c)).collect();
    let declared: BTreeSet<String> = fields.iter().map(column_name).collect();

    let mut diff = FieldDiff::default();
    for field in fields {
        let name = column_name(field);
        let want = storage_type(field.field_type);
        match live_by_name.get(name.as_str()) {
            None => diff.missing.push(MissingField {
                name,
                want_type: want,
            }),
            Some(col) => {
                let have = live_type(col);
                if type_family(&have) != type_family(&want) {
                    diff.type_mismatch.push(TypeMismatch {
                        name,
                        have_type: have,
                        want_type: want,
                    });
                }
            }
        }
    }

    for col in live {
        if !declared.contains(&col.name) && !SYSTEM_COLUMNS.contains(&col.name.as_str()) {
            diff.extra.push(ExtraColumn {
                name: col.name.clone(),
                have_type: live_type(col),
            });
        }
    }
    diff
}

// ── Statements ───────────────────────────────────────────────────────────────

fn index_name(table: &str, column: &str, suffix: &str) -> String {
    let mut name = format!("{table}_{column}_{suffix}");
    while name.len() > MAX_IDENTIFIER_BYTES {
        name.pop();
    }
    name
}

fn trigram_index_name(table: &str, column: &str) -> String {
    index_name(table, column, "trgm_idx")
}

fn full_text_index_name(table: &str) -> String {
    index_name(table, FULL_TEXT_COLUMN, "fts_idx")
}

fn column_statements(table: &str, diff: &FieldDiff) -> Vec<MigrationStatement> {
    let t = quote_ident(table);
    let mut out = Vec::new();

    if diff.missing.iter().any(|m| type_family(&m.want_type) == "vector") {
        out.push(MigrationStatement::apply(
            "CREATE EXTENSION IF NOT EXISTS vector".into(),
            "vector columns need pgvector",
        ));
    }
    for m in &diff.missing {
        out.push(MigrationStatement::apply(
            format!(
                "ALTER TABLE {t} ADD COLUMN IF NOT EXISTS {} {}",
                quote_ident(&m.name),
                m.want_type
            ),
            format!("missing column '{}'", m.name),
        ));
    }

    for mm in &diff.type_mismatch {
        let c = quote_ident(&mm.name);
        let want = type_family(&mm.want_type);
        if want == "numeric" && mm.have_type == "text" {
            out.push(MigrationStatement::apply(
                format!(
                    "ALTER TABLE {t} ALTER COLUMN {c} TYPE numeric \
                     USING NULLIF(regexp_replace({c}, '[^0-9.\\-]', '', 'g'), '')::numeric"
                ),
                format!("'{}' text → numeric, non-numeric characters stripped", mm.name),
            ));
        } else if want == "text" {
            out.push(MigrationStatement::apply(
                format!("ALTER TABLE {t} ALTER COLUMN {c} TYPE text USING {c}::text"),
                format!("'{}' {} → text", mm.name, mm.have_type),
            ));
        } else {
            out.push(MigrationStatement::review(
                format!(
                    "-- review: ALTER TABLE {t} ALTER COLUMN {c} TYPE {} (currently {})",
                    mm.want_type, mm.have_type
                ),
                format!(
                    "'{}' {} → {} has no safe cast",
                    mm.name, mm.have_type, mm.want_type
                ),
            ));
        }
    }
    out
}

fn index_statements(
    table: &str,
    columns_after: &BTreeSet<String>,
    live_indexes: &[LiveIndex],
) -> Vec<MigrationStatement> {
    let t = quote_ident(table);
    let existing: BTreeSet<&str> = live_indexes.iter().map(|i| i.name.as_str()).collect();
    let mut out = Vec::new();

    let missing_trigram: Vec<&str> = TRIGRAM_COLUMNS
        .iter()
        .copied()
        .filter(|c| columns_after.contains(*c))
        .filter(|c| !existing.contains(trigram_index_name(table, c).as_str()))
        .collect();
    if !missing_trigram.is_empty() {
        out.push(MigrationStatement::apply(
            "CREATE EXTENSION IF NOT EXISTS pg_trgm".into(),
            "trigram indexes need pg_trgm",
        ));
    }
    for column in missing_trigram {
        let name = trigram_index_name(table, column);
        out.push(MigrationStatement::apply(
            format!(
                "CREATE INDEX IF NOT EXISTS {} ON {t} USING gin ({} gin_trgm_ops)",
                quote_ident(&name),
                quote_ident(column)
            ),
            format!("trigram search on '{column}'"),
        ));
    }

    let fts_name = full_text_index_name(table);
    if columns_after.contains(FULL_TEXT_COLUMN) && !existing.contains(fts_name.as_str()) {
        out.push(MigrationStatement::apply(
            format!(
                "CREATE INDEX IF NOT EXISTS {} ON {t} USING gin \
                 (to_tsvector('simple', coalesce({}, '')))",
                quote_ident(&fts_name),
                quote_ident(FULL_TEXT_COLUMN)
            ),
            format!("full-text search on '{FULL_TEXT_COLUMN}'"),
        ));
    }

    // Managed indexes whose column has gone.
    for column in TRIGRAM_COLUMNS {
        let name = trigram_index_name(table, column);
        if !columns_after.contains(*column) && existing.contains(name.as_str()) {
            out.push(MigrationStatement::apply(
                format!("DROP INDEX IF EXISTS {}", quote_ident(&name)),
                format!("column '{column}' no longer exists"),
            ));
        }
    }
    if !columns_after.contains(FULL_TEXT_COLUMN) && existing.contains(fts_name.as_str()) {
        out.push(MigrationStatement::apply(
            format!("DROP INDEX IF EXISTS {}", quote_ident(&fts_name)),
            format!("column '{FULL_TEXT_COLUMN}' no longer exists"),
        ));
    }
    out
}

/// Every statement needed to align `table` with `diff`, given its live
/// columns and indexes.
pub fn plan_statements(
    table: &str,
    diff: &FieldDiff,
    live_columns: &[LiveColumn],
    live_indexes: &[LiveIndex],
) -> Vec<MigrationStatement> {
    let columns_after: BTreeSet<String> = live_columns
        .iter()
        .map(|c| c.name.clone())
        .chain(diff.missing.iter().map(|m| m.name.clone()))
        .collect();
    let mut statements = column_statements(table, diff);
    statements.extend(index_statements(table, &columns_after, live_indexes));
    statements
}

// ── Store-facing operations ──────────────────────────────────────────────────

/// Introspect `table` and compute the diff and statements. Executes nothing.
pub async fn plan(
    store: &dyn RelationalStore,
    table: &str,
    fields: &[BlueprintField],
) -> Result<Reconciliation, CatalogError> {
    validate_fields(table, fields)?;
    let live_columns = store.columns(table).await?;
    let live_indexes = store.indexes(table).await?;
    debug!(
        table,
        columns = live_columns.len(),
        indexes = live_indexes.len(),
        "Introspected live table"
    );

    let diff = diff_fields(&live_columns, fields);
    let statements = plan_statements(table, &diff, &live_columns, &live_indexes);
    for s in statements.iter().filter(|s| s.kind == StatementKind::ReviewOnly) {
        warn!(table, "Needs review: {}", s.reason);
    }
    Ok(Reconciliation {
        table: table.to_string(),
        diff,
        statements,
        applied: 0,
    })
}

/// Execute the `apply` statements in order, without a transaction.
///
/// Returns how many ran. The first failure stops the run with
/// [`CatalogError::Migration`]; nothing is retried.
pub async fn apply_statements(
    store: &dyn RelationalStore,
    statements: &[MigrationStatement],
) -> Result<usize, CatalogError> {
    let mut applied = 0;
    for statement in statements.iter().filter(|s| s.kind == StatementKind::Apply) {
        debug!("Executing: {}", statement.sql);
        if let Err(e) = store.execute(&statement.sql).await {
            return Err(CatalogError::Migration {
                applied,
                statement: statement.sql.clone(),
                detail: e.to_string(),
            });
        }
        applied += 1;
    }
    Ok(applied)
}

/// [`plan`], then [`apply_statements`] when `apply` is set.
pub async fn reconcile(
    store: &dyn RelationalStore,
    table: &str,
    fields: &[BlueprintField],
    apply: bool,
) -> Result<Reconciliation, CatalogError> {
    let mut rec = plan(store, table, fields).await?;
    if apply {
        rec.applied = apply_statements(store, &rec.statements).await?;
        info!(table, applied = rec.applied, "Reconciliation applied");
    } else {
        info!(
            table,
            pending = rec.apply_statements().count(),
            "Reconciliation planned"
        );
    }
    Ok(rec)
}
