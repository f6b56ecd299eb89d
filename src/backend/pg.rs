//! PostgreSQL relational store.
//!
//! Column and index introspection read `information_schema.columns` and
//! `pg_indexes` restricted to the current search path. Blueprints, recipes
//! and the brand dictionary are read from the `catalog_blueprints`,
//! `catalog_recipes` and `catalog_brands` tables, which are provisioned
//! outside this crate; their JSON columns are read as text and parsed with
//! `serde_json`.

use super::{LiveColumn, LiveIndex, RelationalStore};
use crate::blueprint::{Blueprint, BlueprintField, Recipe};
use crate::error::CatalogError;
use crate::model::{BrandDictionary, BrandEntry};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::debug;

pub struct PgStore {
    pool: PgPool,
}

fn store_err(e: sqlx::Error) -> CatalogError {
    CatalogError::Store(e.to_string())
}

fn parse_json<T: DeserializeOwned + Default>(raw: Option<String>, what: &str) -> Result<T, CatalogError> {
    match raw {
        Some(s) if !s.trim().is_empty() => serde_json::from_str(&s)
            .map_err(|e| CatalogError::Store(format!("invalid {what} JSON: {e}"))),
        _ => Ok(T::default()),
    }
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, CatalogError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(store_err)?;
        debug!("Connected to relational store");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RelationalStore for PgStore {
    async fn columns(&self, table: &str) -> Result<Vec<LiveColumn>, CatalogError> {
        let rows = sqlx::query(
            "SELECT column_name::text AS name, data_type::text AS data_type, udt_name::text AS udt_name \
             FROM information_schema.columns \
             WHERE table_schema = ANY (current_schemas(false)) AND table_name = $1 \
             ORDER BY ordinal_position",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(rows
            .iter()
            .map(|r| LiveColumn {
                name: r.get("name"),
                data_type: r.get("data_type"),
                udt_name: r.get("udt_name"),
            })
            .collect())
    }

    async fn indexes(&self, table: &str) -> Result<Vec<LiveIndex>, CatalogError> {
        let rows = sqlx::query(
            "SELECT indexname::text AS name, indexdef AS definition FROM pg_indexes \
             WHERE schemaname = ANY (current_schemas(false)) AND tablename = $1 \
             ORDER BY indexname",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(rows
            .iter()
            .map(|r| LiveIndex {
                name: r.get("name"),
                definition: r.get("definition"),
            })
            .collect())
    }

    async fn execute(&self, sql: &str) -> Result<(), CatalogError> {
        sqlx::query(sql)
            .persistent(false)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn blueprint(&self, family: &str) -> Result<Option<Blueprint>, CatalogError> {
        let row = sqlx::query(
            "SELECT fields::text AS fields, variant_keys::text AS variant_keys \
             FROM catalog_blueprints WHERE family = $1",
        )
        .bind(family)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let fields: Vec<BlueprintField> = parse_json(row.get("fields"), "blueprint fields")?;
        let variant_keys: Vec<String> = parse_json(row.get("variant_keys"), "variant keys")?;
        Ok(Some(Blueprint {
            family: family.to_string(),
            fields,
            variant_keys,
        }))
    }

    async fn recipes(&self, family: &str) -> Result<Vec<Recipe>, CatalogError> {
        let rows = sqlx::query(
            "SELECT brand, series, aliases::text AS aliases FROM catalog_recipes \
             WHERE family = $1 ORDER BY id",
        )
        .bind(family)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.iter()
            .map(|r| -> Result<Recipe, CatalogError> {
                Ok(Recipe {
                    family: family.to_string(),
                    brand: r.get("brand"),
                    series: r.get("series"),
                    aliases: parse_json(r.get("aliases"), "recipe aliases")?,
                })
            })
            .collect()
    }

    async fn brands(&self) -> Result<BrandDictionary, CatalogError> {
        let rows = sqlx::query("SELECT name, aliases::text AS aliases FROM catalog_brands ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;

        let brands = rows
            .iter()
            .map(|r| -> Result<BrandEntry, CatalogError> {
                Ok(BrandEntry {
                    name: r.get("name"),
                    aliases: parse_json(r.get("aliases"), "brand aliases")?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(BrandDictionary::new(brands))
    }
}
