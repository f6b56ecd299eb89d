//! Page selection and sampling.
//!
//! OCR engines charge (and limit) per page, so the extraction engine asks
//! for the pages most likely to hold the ordering/type table. Scoring works on
//! text that is already available locally; no I/O happens here.

use crate::model::{PageCandidate, PageText};
use once_cell::sync::Lazy;
use regex::Regex;

/// Maximum pages [`select_pages`] returns.
pub const MAX_SELECTED_PAGES: usize = 8;

const EXCERPT_CHARS: usize = 160;

static RE_PART_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)part\s*(?:number|no\.?|#)").unwrap());

fn count_occurrences(haystack_lower: &str, needle: &str) -> usize {
    let needle = needle.to_lowercase();
    if needle.is_empty() {
        return 0;
    }
    haystack_lower.matches(needle.as_str()).count()
}

fn score_page(text: &str, target_keywords: &[String]) -> usize {
    let lower = text.to_lowercase();
    let keyword_hits: usize = target_keywords
        .iter()
        .map(|k| count_occurrences(&lower, k))
        .sum();
    keyword_hits + RE_PART_NUMBER.find_iter(text).count()
}

/// Score every page, highest first; ties keep document order.
pub fn rank_pages(pages: &[PageText], target_keywords: &[String]) -> Vec<PageCandidate> {
    let mut ranked: Vec<PageCandidate> = pages
        .iter()
        .map(|p| PageCandidate {
            page_number: p.page,
            score: score_page(&p.text, target_keywords),
            text_excerpt: p.text.chars().take(EXCERPT_CHARS).collect(),
        })
        .collect();
    // sort_by is stable
    ranked.sort_by(|a, b| b.score.cmp(&a.score));
    ranked
}

/// Up to [`MAX_SELECTED_PAGES`] page numbers with a positive score, best first.
pub fn select_pages(pages: &[PageText], target_keywords: &[String]) -> Vec<usize> {
    select_pages_limited(pages, target_keywords, MAX_SELECTED_PAGES)
}

/// [`select_pages`] with a caller-chosen cap.
pub fn select_pages_limited(
    pages: &[PageText],
    target_keywords: &[String],
    limit: usize,
) -> Vec<usize> {
    rank_pages(pages, target_keywords)
        .into_iter()
        .filter(|c| c.score > 0)
        .take(limit)
        .map(|c| c.page_number)
        .collect()
}

/// Representative pages of a `total`-page document when only `count` fit.
///
/// First 3 pages, last 2 pages, then evenly spaced interior pages until
/// `count` is reached. Ascending and deduplicated.
pub fn sample_pages(total: usize, count: usize) -> Vec<usize> {
    if total == 0 || count == 0 {
        return Vec::new();
    }
    if total <= count {
        return (1..=total).collect();
    }

    let mut picked: Vec<usize> = Vec::with_capacity(count);
    let push = |p: usize, picked: &mut Vec<usize>| {
        if p >= 1 && p <= total && !picked.contains(&p) && picked.len() < count {
            picked.push(p);
        }
    };

    for p in 1..=3 {
        push(p, &mut picked);
    }
    push(total.saturating_sub(1), &mut picked);
    push(total, &mut picked);

    // Interior pages lie strictly between page 3 and page total-1.
    let remaining = count.saturating_sub(picked.len());
    if remaining > 0 && total > 5 {
        let interior_start = 4;
        let interior_end = total - 2;
        let span = interior_end - interior_start + 1;
        for i in 0..remaining {
            let offset = (i * 2 + 1) * span / (remaining * 2);
            push(interior_start + offset.min(span - 1), &mut picked);
        }
        // Rounding can collide on small spans; fill the gaps in order.
        let mut p = interior_start;
        while picked.len() < count && p <= interior_end {
            push(p, &mut picked);
            p += 1;
        }
    }

    picked.sort_unstable();
    picked
}
