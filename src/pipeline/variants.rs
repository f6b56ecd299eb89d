//! Variant key inference.
//!
//! A variant key is an attribute whose value differs across the rows of one
//! product (coil voltage, contact form, ...). Header labels in datasheets are
//! free text, so labels are first matched to known keys through a weighted
//! alias index, then the distinct values seen per key decide promotion.

use crate::blueprint::{Blueprint, Recipe};
use crate::model::RawTable;
use crate::pipeline::normalize::{normalize_alias, normalize_key, normalize_value, slug};
use crate::pipeline::table::row_dicts;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

/// One alias spelling pointing at a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasEntry {
    pub normalized_alias: String,
    pub key: String,
    /// Defaults to the alias length in characters.
    pub weight: usize,
}

impl AliasEntry {
    pub fn new(alias: &str, key: &str) -> Self {
        let normalized_alias = normalize_alias(alias);
        let weight = normalized_alias.chars().count();
        Self {
            normalized_alias,
            key: normalize_key(key),
            weight,
        }
    }
}

/// Read-only label → key lookup for one `(family, brand, series)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasIndex {
    keys: Vec<String>,
    entries: Vec<AliasEntry>,
}

impl AliasIndex {
    /// Build from declared variant keys plus the aliases of `recipes`.
    ///
    /// Every key is also its own alias. Recipe keys that the blueprint does
    /// not declare still join the index.
    pub fn build(variant_keys: &[String], recipes: &[&Recipe]) -> Self {
        let mut index = Self::default();
        for key in variant_keys {
            index.add_key(key);
        }
        for recipe in recipes {
            let Some(aliases) = &recipe.aliases else {
                continue;
            };
            for (key, spellings) in aliases {
                index.add_key(key);
                for alias in spellings {
                    index.add_alias(alias, key);
                }
            }
        }
        index
    }

    fn add_key(&mut self, key: &str) {
        let k = normalize_key(key);
        if k.is_empty() || self.keys.contains(&k) {
            return;
        }
        self.keys.push(k.clone());
        self.add_alias(&k, &k);
    }

    fn add_alias(&mut self, alias: &str, key: &str) {
        let entry = AliasEntry::new(alias, key);
        if entry.normalized_alias.is_empty() || entry.key.is_empty() {
            return;
        }
        if !self.entries.contains(&entry) {
            self.entries.push(entry);
        }
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn entries(&self) -> &[AliasEntry] {
        &self.entries
    }

    /// Map a header label to a known key.
    ///
    /// Order: exact key, then a key appearing as whole `_`-delimited words
    /// inside the label (longest key wins), then an exact alias, then an
    /// alias contained in the label or containing it. Alias ties go to the
    /// heavier entry; equal weights keep index order.
    pub fn find_key_for_label(&self, label: &str) -> Option<&str> {
        let nk = normalize_key(label);
        if nk.is_empty() {
            return None;
        }

        if let Some(k) = self.keys.iter().find(|k| **k == nk) {
            return Some(k.as_str());
        }

        let padded_label = format!("_{nk}_");
        let mut best_key: Option<&String> = None;
        for k in &self.keys {
            if padded_label.contains(&format!("_{k}_"))
                && best_key.map_or(true, |b| k.chars().count() > b.chars().count())
            {
                best_key = Some(k);
            }
        }
        if let Some(k) = best_key {
            return Some(k.as_str());
        }

        let na = normalize_alias(label);
        if let Some(e) = heaviest(self.entries.iter().filter(|e| e.normalized_alias == na)) {
            return Some(e.key.as_str());
        }

        let padded_alias = format!(" {na} ");
        heaviest(self.entries.iter().filter(|e| {
            let padded_entry = format!(" {} ", e.normalized_alias);
            padded_alias.contains(&padded_entry) || padded_entry.contains(&padded_alias)
        }))
        .map(|e| e.key.as_str())
    }
}

/// First entry with the maximum weight.
fn heaviest<'a>(entries: impl Iterator<Item = &'a AliasEntry>) -> Option<&'a AliasEntry> {
    let mut best: Option<&AliasEntry> = None;
    for e in entries {
        if best.map_or(true, |b| e.weight > b.weight) {
            best = Some(e);
        }
    }
    best
}

/// Whether `recipe` applies to a document of `brand`/`series`.
///
/// An unset (or blank) recipe field matches anything; a set one must equal
/// the document's value after slugging.
pub fn recipe_matches(recipe: &Recipe, brand: &str, series: &str) -> bool {
    let field_matches = |want: &Option<String>, have: &str| match want {
        Some(w) if !w.trim().is_empty() => slug(w) == slug(have),
        _ => true,
    };
    field_matches(&recipe.brand, brand) && field_matches(&recipe.series, series)
}

/// Recipes of `recipes` applying to `brand`/`series`, in input order.
pub fn filter_recipes<'a>(recipes: &'a [Recipe], brand: &str, series: &str) -> Vec<&'a Recipe> {
    recipes
        .iter()
        .filter(|r| recipe_matches(r, brand, series))
        .collect()
}

/// Per-run cache of alias indexes keyed by `(family, brand, series)` slugs.
///
/// Indexes are shared behind `Arc` and never mutated once built.
#[derive(Debug, Default)]
pub struct AliasCache {
    indexes: HashMap<(String, String, String), Arc<AliasIndex>>,
}

impl AliasCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached index for the blueprint's family and this brand/series, built
    /// from `recipes` on first use.
    pub fn get_or_build(
        &mut self,
        blueprint: &Blueprint,
        brand: &str,
        series: &str,
        recipes: &[Recipe],
    ) -> Arc<AliasIndex> {
        let key = (slug(&blueprint.family), slug(brand), slug(series));
        self.indexes
            .entry(key)
            .or_insert_with(|| {
                let matching = filter_recipes(recipes, brand, series);
                debug!(
                    family = %blueprint.family,
                    recipes = matching.len(),
                    "Building alias index"
                );
                Arc::new(AliasIndex::build(&blueprint.variant_keys, &matching))
            })
            .clone()
    }

    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }
}

/// Outcome of [`infer_variant_keys`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantInference {
    /// Keys with at least `threshold` distinct values, in index order.
    pub detected: Vec<String>,
    /// Detected keys the blueprint did not declare.
    pub new_keys: Vec<String>,
    /// Distinct normalized values collected per matched key.
    pub observed: BTreeMap<String, BTreeSet<String>>,
}

fn is_blank_value(v: &str) -> bool {
    v.is_empty() || v.chars().all(|c| c == '-')
}

/// Detect which keys vary across `tables` and caller-supplied `rows`.
///
/// Collection for a key stops once it holds `threshold` distinct values.
pub fn infer_variant_keys(
    index: &AliasIndex,
    declared: &[String],
    tables: &[RawTable],
    rows: &[BTreeMap<String, String>],
    threshold: usize,
) -> VariantInference {
    let mut observed: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut label_cache: HashMap<String, Option<String>> = HashMap::new();

    let table_rows: Vec<BTreeMap<String, String>> = tables.iter().flat_map(row_dicts).collect();
    for row in table_rows.iter().chain(rows) {
        for (label, cell) in row {
            let key = label_cache
                .entry(label.clone())
                .or_insert_with(|| index.find_key_for_label(label).map(str::to_string));
            let Some(key) = key else { continue };

            let values = observed.entry(key.clone()).or_default();
            if values.len() >= threshold {
                continue;
            }
            let value = normalize_value(cell);
            if !is_blank_value(&value) {
                values.insert(value);
            }
        }
    }

    let declared: BTreeSet<String> = declared.iter().map(|k| normalize_key(k)).collect();
    let detected: Vec<String> = index
        .keys()
        .iter()
        .filter(|k| observed.get(*k).is_some_and(|v| v.len() >= threshold))
        .cloned()
        .collect();
    let new_keys = detected
        .iter()
        .filter(|k| !declared.contains(*k))
        .cloned()
        .collect();

    VariantInference {
        detected,
        new_keys,
        observed,
    }
}
