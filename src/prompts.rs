//! Prompts for candidate-constrained generation.
//!
//! The resolver never lets the model invent a brand or code: it supplies two
//! closed candidate lists and asks for a JSON object that picks from them.
//! The reply is still re-validated by [`crate::pipeline::resolve`].

use serde_json::{json, Value};

/// System instruction for brand/code/series resolution.
pub const RESOLVER_SYSTEM_PROMPT: &str = r#"You identify the manufacturer and the primary part code of a product datasheet.

Follow these rules precisely:

1. BRAND
   - Choose the brand ONLY from "brand_candidates"
   - Copy the candidate exactly as written
   - If none of the candidates is the manufacturer, return ""

2. CODE
   - Choose the code ONLY from "code_candidates"
   - Prefer the base ordering code of the product, not an accessory or a standard number
   - If none of the candidates is a product code, return ""

3. SERIES
   - The product series or family name as printed in the text, or ""

4. OUTPUT FORMAT
   - Output ONLY a JSON object: {"brand": "...", "code": "...", "series": "..."}
   - Do NOT wrap it in ``` fences
   - Do NOT add commentary
   - Never return a value that is not in the candidate lists"#;

/// User payload sent alongside [`RESOLVER_SYSTEM_PROMPT`].
///
/// `corpus` is truncated to `max_chars` characters.
pub fn resolver_payload(
    brand_candidates: &[String],
    code_candidates: &[String],
    corpus: &str,
    max_chars: usize,
) -> Value {
    let text: String = corpus.chars().take(max_chars).collect();
    json!({
        "brand_candidates": brand_candidates,
        "code_candidates": code_candidates,
        "text": text,
    })
}
