//! Declarative product-family schemas and per-brand extraction recipes.

use crate::error::CatalogError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Dimension used when a blueprint says `vector` without one.
pub const DEFAULT_VECTOR_DIMENSIONS: usize = 1536;

/// Logical type of a blueprint field.
///
/// Parsing is lenient: any unrecognised spelling is treated as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FieldType {
    Int,
    Numeric,
    Boolean,
    Json,
    Vector(usize),
    #[default]
    Text,
}

impl From<&str> for FieldType {
    fn from(s: &str) -> Self {
        let s = s.trim().to_ascii_lowercase();
        if let Some(rest) = s.strip_prefix("vector") {
            let dims = rest
                .trim_matches(|c: char| c == '(' || c == ')' || c.is_whitespace())
                .parse()
                .unwrap_or(DEFAULT_VECTOR_DIMENSIONS);
            return FieldType::Vector(dims);
        }
        match s.as_str() {
            "int" | "integer" | "int4" | "bigint" | "smallint" => FieldType::Int,
            "numeric" | "number" | "decimal" | "float" | "double" | "real" | "float8" => {
                FieldType::Numeric
            }
            "bool" | "boolean" => FieldType::Boolean,
            "json" | "jsonb" | "object" | "array" => FieldType::Json,
            _ => FieldType::Text,
        }
    }
}

impl From<String> for FieldType {
    fn from(s: String) -> Self {
        FieldType::from(s.as_str())
    }
}

impl From<FieldType> for String {
    fn from(t: FieldType) -> Self {
        t.to_string()
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Int => f.write_str("int"),
            FieldType::Numeric => f.write_str("numeric"),
            FieldType::Boolean => f.write_str("boolean"),
            FieldType::Json => f.write_str("json"),
            FieldType::Vector(d) => write!(f, "vector({d})"),
            FieldType::Text => f.write_str("text"),
        }
    }
}

/// One declared field of a family table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlueprintField {
    pub name: String,
    #[serde(rename = "type", default)]
    pub field_type: FieldType,
}

impl BlueprintField {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }
}

/// Declarative schema of a product family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blueprint {
    pub family: String,
    #[serde(default)]
    pub fields: Vec<BlueprintField>,
    /// Attribute keys already known to vary across the family's rows.
    #[serde(default)]
    pub variant_keys: Vec<String>,
}

impl Blueprint {
    /// Reject blueprints the reconciler or inference could not use safely.
    pub fn validate(&self) -> Result<(), CatalogError> {
        let invalid = |detail: String| CatalogError::InvalidBlueprint {
            family: self.family.clone(),
            detail,
        };
        if self.family.trim().is_empty() {
            return Err(invalid("family name is empty".into()));
        }
        let mut seen = HashSet::new();
        for field in &self.fields {
            let name = field.name.trim();
            if name.is_empty() {
                return Err(invalid("field with empty name".into()));
            }
            if !seen.insert(name.to_lowercase()) {
                return Err(invalid(format!("duplicate field '{name}'")));
            }
        }
        Ok(())
    }
}

/// Per-family/brand/series extraction overrides.
///
/// A recipe without `brand`/`series` applies to every document of the family.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipe {
    pub family: String,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub series: Option<String>,
    /// Variant key → header spellings seen for it.
    #[serde(default)]
    pub aliases: Option<BTreeMap<String, Vec<String>>>,
}
