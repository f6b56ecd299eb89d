//! Candidate-constrained brand/code/series resolution.
//!
//! The generation engine only ever chooses from closed candidate sets built
//! here, and its answer is checked against those sets again afterwards. A
//! value outside the sets is discarded, never trusted.

use crate::backend::{GenerationEngine, GenerationOptions};
use crate::config::PipelineConfig;
use crate::error::{CatalogError, Diagnostics, PipelineWarning};
use crate::model::{BrandDictionary, BrandResolution, ResolutionSource};
use crate::pipeline::strategy::with_timeout;
use crate::pipeline::tokenize::{keyword_windows, strip_code_edges, tokenize};
use crate::prompts::{resolver_payload, RESOLVER_SYSTEM_PROMPT};
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, info};

/// Candidate sets offered to the generation engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Candidates {
    /// Canonical brand names, ordered by first mention in the corpus.
    pub brands: Vec<String>,
    /// Window tokens first, then corpus tokens; capped.
    pub codes: Vec<String>,
    /// Tokens found inside keyword windows, in first-found order.
    pub window_codes: Vec<String>,
}

/// Brands whose name or any alias occurs in `corpus` (case-insensitive),
/// ordered by earliest hit.
pub fn brand_candidates(corpus: &str, dictionary: &BrandDictionary) -> Vec<String> {
    let lower = corpus.to_lowercase();
    let mut hits: Vec<(usize, &str)> = Vec::new();
    for entry in &dictionary.brands {
        let first_hit = std::iter::once(&entry.name)
            .chain(&entry.aliases)
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .filter_map(|s| lower.find(&s))
            .min();
        if let Some(pos) = first_hit {
            hits.push((pos, entry.name.as_str()));
        }
    }
    hits.sort_by_key(|(pos, _)| *pos);

    let mut seen = HashSet::new();
    hits.into_iter()
        .filter(|(_, name)| seen.insert(name.to_lowercase()))
        .map(|(_, name)| name.to_string())
        .collect()
}

/// Code candidates: tokens of every keyword window, then of the whole corpus.
pub fn code_candidates(corpus: &str, window_size: usize, cap: usize) -> (Vec<String>, Vec<String>) {
    let mut seen = HashSet::new();
    let mut window_codes = Vec::new();
    for window in keyword_windows(corpus, window_size) {
        for token in tokenize(&window) {
            if seen.insert(token.clone()) {
                window_codes.push(token);
            }
        }
    }

    let mut codes: Vec<String> = window_codes.iter().take(cap).cloned().collect();
    if codes.len() < cap {
        for token in tokenize(corpus) {
            if codes.len() >= cap {
                break;
            }
            if seen.insert(token.clone()) {
                codes.push(token);
            }
        }
    }
    (codes, window_codes)
}

/// Build both candidate sets for `corpus`.
pub fn candidates(corpus: &str, dictionary: &BrandDictionary, config: &PipelineConfig) -> Candidates {
    let (codes, window_codes) =
        code_candidates(corpus, config.keyword_window, config.max_code_candidates);
    Candidates {
        brands: brand_candidates(corpus, dictionary),
        codes,
        window_codes,
    }
}

fn reply_field(reply: &Value, names: &[&str]) -> String {
    names
        .iter()
        .find_map(|n| reply.get(*n).and_then(Value::as_str))
        .unwrap_or_default()
        .trim()
        .to_string()
}

/// Canonical brand for `answer`: a candidate matching it, or a candidate one
/// of whose aliases matches it.
fn canonical_brand(answer: &str, brands: &[String], dictionary: &BrandDictionary) -> Option<String> {
    let want = answer.trim().to_lowercase();
    if let Some(b) = brands.iter().find(|b| b.trim().to_lowercase() == want) {
        return Some(b.clone());
    }
    dictionary
        .brands
        .iter()
        .filter(|e| brands.contains(&e.name))
        .find(|e| e.aliases.iter().any(|a| a.trim().to_lowercase() == want))
        .map(|e| e.name.clone())
}

/// Check a generation reply against the candidates.
///
/// Returns the resolution and the rejected `(field, value)` pairs.
pub fn validate_reply(
    reply: &Value,
    candidates: &Candidates,
    dictionary: &BrandDictionary,
) -> (BrandResolution, Vec<(String, String)>) {
    let brand_answer = reply_field(reply, &["brand", "manufacturer"]);
    let code_answer = strip_code_edges(&reply_field(reply, &["code", "part_number", "model"]))
        .to_uppercase();
    let series = reply_field(reply, &["series"]);

    let mut rejected = Vec::new();
    let brand = if brand_answer.is_empty() {
        String::new()
    } else {
        canonical_brand(&brand_answer, &candidates.brands, dictionary).unwrap_or_else(|| {
            rejected.push(("brand".to_string(), brand_answer.clone()));
            String::new()
        })
    };
    let code = if code_answer.is_empty() {
        String::new()
    } else {
        candidates
            .codes
            .iter()
            .find(|c| c.eq_ignore_ascii_case(&code_answer))
            .cloned()
            .unwrap_or_else(|| {
                rejected.push(("code".to_string(), code_answer.clone()));
                String::new()
            })
    };

    let source = if brand.is_empty() && code.is_empty() {
        ResolutionSource::None
    } else {
        ResolutionSource::Ai
    };
    (
        BrandResolution {
            brand,
            code,
            series,
            source,
        },
        rejected,
    )
}

/// First brand candidate and first keyword-window code.
///
/// Only window tokens that made it into the capped `codes` set qualify.
/// Window tokens include plain words ("RELAY"), so the first one carrying a
/// digit is preferred.
pub fn heuristic(candidates: &Candidates) -> BrandResolution {
    let brand = candidates.brands.first().cloned().unwrap_or_default();
    let offered: HashSet<&str> = candidates.codes.iter().map(String::as_str).collect();
    let windowed: Vec<&String> = candidates
        .window_codes
        .iter()
        .filter(|c| offered.contains(c.as_str()))
        .collect();
    let code = windowed
        .iter()
        .find(|c| c.chars().any(|ch| ch.is_ascii_digit()))
        .or_else(|| windowed.first())
        .map(|c| (*c).clone())
        .unwrap_or_default();
    if brand.is_empty() && code.is_empty() {
        return BrandResolution::none();
    }
    BrandResolution {
        brand,
        code,
        series: String::new(),
        source: ResolutionSource::Heuristic,
    }
}

/// Resolve brand, code and series of the document in `corpus`.
///
/// Without an engine, or when the call fails or times out, falls back to
/// [`heuristic`]. Errors only when `engine` has no model identity.
pub async fn resolve_brand_code(
    corpus: &str,
    dictionary: &BrandDictionary,
    engine: Option<&dyn GenerationEngine>,
    config: &PipelineConfig,
    diagnostics: &mut Diagnostics,
) -> Result<BrandResolution, CatalogError> {
    if let Some(engine) = engine {
        if engine.model().trim().is_empty() {
            return Err(CatalogError::Config(
                "generation engine is configured without a model identity".into(),
            ));
        }
    }

    let candidates = candidates(corpus, dictionary, config);
    debug!(
        brands = candidates.brands.len(),
        codes = candidates.codes.len(),
        "Resolver candidates built"
    );

    let Some(engine) = engine else {
        return Ok(heuristic(&candidates));
    };
    if candidates.brands.is_empty() && candidates.codes.is_empty() {
        return Ok(BrandResolution::none());
    }

    let payload = resolver_payload(
        &candidates.brands,
        &candidates.codes,
        corpus,
        config.prompt_corpus_chars,
    );
    let options = GenerationOptions {
        temperature: config.temperature,
        max_output_tokens: config.max_tokens,
    };
    let reply = with_timeout(
        config.call_timeout_secs,
        engine.generate_json(RESOLVER_SYSTEM_PROMPT, &payload, options),
    )
    .await;

    match reply {
        Ok(reply) => {
            let (resolution, rejected) = validate_reply(&reply, &candidates, dictionary);
            for (field, value) in rejected {
                diagnostics.push(PipelineWarning::RejectedCandidate { field, value });
            }
            info!(
                brand = %resolution.brand,
                code = %resolution.code,
                series = %resolution.series,
                source = ?resolution.source,
                "Resolved via constrained generation"
            );
            Ok(resolution)
        }
        Err(e) => {
            diagnostics.push(PipelineWarning::GenerationFailed {
                detail: e.to_string(),
            });
            Ok(heuristic(&candidates))
        }
    }
}
