//! Reconciliation against an in-memory relational store.

mod common;

use common::MemoryStore;
use datasheet_catalog::backend::RelationalStore;
use datasheet_catalog::schema::family_table;
use datasheet_catalog::{reconcile, BlueprintField, CatalogError, FieldType, StatementKind};

fn fields(columns: &[(&str, &str)]) -> Vec<BlueprintField> {
    columns
        .iter()
        .map(|(name, t)| BlueprintField::new(*name, FieldType::from(*t)))
        .collect()
}

#[tokio::test]
async fn fresh_table_is_aligned_and_second_run_is_a_no_op() {
    let table = family_table("Relays");
    let store = MemoryStore::with_table(
        &table,
        &[
            ("id", "bigint"),
            ("brand_norm", "text"),
            ("code_norm", "text"),
            ("raw_document", "text"),
        ],
    );
    let wanted = fields(&[
        ("Coil Voltage", "numeric"),
        ("contact_form", "text"),
        ("embedding", "vector(384)"),
    ]);

    let first = reconcile(&store, &table, &wanted, true).await.unwrap();

    assert_eq!(first.diff.missing.len(), 3);
    assert!(first.diff.extra.is_empty());
    assert_eq!(first.applied, first.statements.len());
    let executed = store.executed();
    assert_eq!(executed[0], "CREATE EXTENSION IF NOT EXISTS vector");
    assert!(executed.contains(&format!(
        "ALTER TABLE \"{table}\" ADD COLUMN IF NOT EXISTS \"coil_voltage\" numeric"
    )));
    assert!(executed.contains(&"CREATE EXTENSION IF NOT EXISTS pg_trgm".to_string()));
    assert!(executed
        .iter()
        .any(|s| s.contains("relays_brand_norm_trgm_idx") && s.contains("gin_trgm_ops")));
    assert!(executed.iter().any(|s| s.contains("relays_raw_document_fts_idx")));
    assert!(!executed.iter().any(|s| s.contains("pn_norm")));
    assert_eq!(store.column_type(&table, "embedding").as_deref(), Some("USER-DEFINED"));

    let second = reconcile(&store, &table, &wanted, true).await.unwrap();

    assert!(second.diff.is_aligned());
    assert_eq!(second.apply_statements().count(), 0);
    assert_eq!(second.applied, 0);
    assert_eq!(store.executed().len(), executed.len());
}

#[tokio::test]
async fn text_column_is_cast_to_numeric_once() {
    let store = MemoryStore::with_table("relays", &[("coil_voltage", "text")]);
    let wanted = fields(&[("coil_voltage", "numeric")]);

    let first = reconcile(&store, "relays", &wanted, true).await.unwrap();

    assert_eq!(first.diff.type_mismatch.len(), 1);
    assert_eq!(first.applied, 1);
    assert!(first.statements[0].sql.contains("regexp_replace"));
    assert_eq!(store.column_type("relays", "coil_voltage").as_deref(), Some("numeric"));

    let second = reconcile(&store, "relays", &wanted, true).await.unwrap();
    assert!(second.diff.is_aligned());
    assert!(second.statements.is_empty());
}

#[tokio::test]
async fn unsafe_casts_are_reported_but_never_executed() {
    let store = MemoryStore::with_table("relays", &[("coil_voltage", "jsonb")]);
    let wanted = fields(&[("coil_voltage", "numeric")]);

    let rec = reconcile(&store, "relays", &wanted, true).await.unwrap();

    assert_eq!(rec.statements.len(), 1);
    assert_eq!(rec.statements[0].kind, StatementKind::ReviewOnly);
    assert!(rec.statements[0].sql.starts_with("-- review:"));
    assert_eq!(rec.applied, 0);
    assert!(store.executed().is_empty());
    assert_eq!(store.column_type("relays", "coil_voltage").as_deref(), Some("jsonb"));
}

#[tokio::test]
async fn planning_executes_nothing() {
    let store = MemoryStore::with_table("relays", &[]);
    let wanted = fields(&[("contact_form", "text")]);

    let rec = reconcile(&store, "relays", &wanted, false).await.unwrap();

    assert_eq!(rec.apply_statements().count(), 1);
    assert_eq!(rec.applied, 0);
    assert!(store.executed().is_empty());
}

#[tokio::test]
async fn failing_statement_reports_partial_progress() {
    let mut store = MemoryStore::with_table("relays", &[]);
    store.fail_on = Some(1);
    let wanted = fields(&[("contact_form", "text"), ("coil_voltage", "numeric")]);

    let err = reconcile(&store, "relays", &wanted, true).await.unwrap_err();

    match err {
        CatalogError::Migration {
            applied, statement, ..
        } => {
            assert_eq!(applied, 1);
            assert!(statement.contains("\"coil_voltage\""), "statement: {statement}");
        }
        other => panic!("expected a migration error, got {other}"),
    }
    assert_eq!(store.executed().len(), 1);
    assert_eq!(store.column_type("relays", "contact_form").as_deref(), Some("text"));
}

#[tokio::test]
async fn index_on_a_vanished_column_is_dropped() {
    let store = MemoryStore::with_table("relays", &[("code_norm", "text")]);
    store.add_index("relays", "relays_code_norm_trgm_idx");
    store.add_index("relays", "relays_pn_norm_trgm_idx");

    let rec = reconcile(&store, "relays", &[], true).await.unwrap();

    assert_eq!(
        store.executed(),
        vec!["DROP INDEX IF EXISTS \"relays_pn_norm_trgm_idx\"".to_string()]
    );
    assert_eq!(rec.applied, 1);
    let left: Vec<String> = store
        .indexes("relays")
        .await
        .unwrap()
        .into_iter()
        .map(|i| i.name)
        .collect();
    assert_eq!(left, vec!["relays_code_norm_trgm_idx".to_string()]);
}

#[tokio::test]
async fn extra_columns_are_left_alone() {
    let store = MemoryStore::with_table(
        "relays",
        &[
            ("id", "bigint"),
            ("coil_voltage", "numeric"),
            ("legacy_rating", "text"),
        ],
    );
    let wanted = fields(&[("coil_voltage", "numeric")]);

    let rec = reconcile(&store, "relays", &wanted, true).await.unwrap();

    assert_eq!(rec.diff.extra.len(), 1);
    assert_eq!(rec.diff.extra[0].name, "legacy_rating");
    assert!(rec.statements.is_empty());
    assert_eq!(store.column_type("relays", "legacy_rating").as_deref(), Some("text"));
}

#[tokio::test]
async fn duplicate_field_names_are_rejected_before_introspection() {
    let store = MemoryStore::with_table("relays", &[]);
    let wanted = fields(&[("Coil Voltage", "numeric"), ("coil_voltage", "text")]);

    let err = reconcile(&store, "relays", &wanted, true).await.unwrap_err();

    assert!(matches!(err, CatalogError::InvalidBlueprint { .. }), "got {err}");
    assert!(store.executed().is_empty());
}
