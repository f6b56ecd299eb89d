//! Configuration types for the ingestion pipeline.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. The config is constructed once at pipeline
//! start and passed by reference into each stage; no stage reads process-wide
//! state.

use crate::error::CatalogError;
use crate::model::StrategySource;
use serde::{Deserialize, Serialize};

/// Keywords that mark an ordering/type table page.
pub const DEFAULT_TARGET_KEYWORDS: &[&str] = &[
    "ordering information",
    "ordering code",
    "order code",
    "part number",
    "type designation",
    "model number",
    "catalog no",
    "品番",
    "型番",
];

/// Configuration for ingesting datasheets.
///
/// # Example
/// ```rust
/// use datasheet_catalog::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .inline_page_limit(10)
///     .call_timeout_secs(30)
///     .build()
///     .unwrap();
/// assert_eq!(config.inline_page_limit, 10);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Hard timeout for every single collaborator call, in seconds. Default: 60.
    pub call_timeout_secs: u64,

    /// Upper bound on waiting for a batch OCR job, in seconds. Default: 600.
    pub batch_timeout_secs: u64,

    /// Page ceiling of the inline/online path. Default: 15.
    ///
    /// Matches the OCR engine's synchronous request limit. Documents above it
    /// go to batch OCR unless the page selector found targeted pages.
    pub inline_page_limit: usize,

    /// Minimum characters for inline text to count as usable. Default: 1000.
    ///
    /// Scanned PDFs often carry a thin text layer (headers, stamps) that is
    /// non-empty but useless.
    pub min_inline_chars: usize,

    /// Maximum pages the page selector returns. Default: 8.
    pub max_selected_pages: usize,

    /// Keywords scored by the page selector.
    pub target_keywords: Vec<String>,

    /// Characters captured on each side of a near-key keyword. Default: 250.
    pub keyword_window: usize,

    /// Cap on code candidates sent to the generation engine. Default: 200.
    pub max_code_candidates: usize,

    /// Corpus characters included in the resolver prompt. Default: 12000.
    pub prompt_corpus_chars: usize,

    /// Distinct values needed to promote a variant key. Default: 2.
    pub variant_threshold: usize,

    /// Sampling temperature for constrained generation. Default: 0.0.
    pub temperature: f32,

    /// Output token budget for constrained generation. Default: 256.
    pub max_tokens: usize,

    /// Blob prefix under which batch OCR writes its results.
    /// Default: `file://ocr-output/batch`.
    pub batch_output_prefix: String,

    /// Enabled strategies, in fallback order. Default: inline, online, batch.
    pub strategies: Vec<StrategySource>,

    /// Documents processed at once by [`crate::ingest_many`]. Default: 4.
    pub concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: 60,
            batch_timeout_secs: 600,
            inline_page_limit: 15,
            min_inline_chars: 1000,
            max_selected_pages: 8,
            target_keywords: DEFAULT_TARGET_KEYWORDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            keyword_window: 250,
            max_code_candidates: 200,
            prompt_corpus_chars: 12_000,
            variant_threshold: 2,
            temperature: 0.0,
            max_tokens: 256,
            batch_output_prefix: "file://ocr-output/batch".to_string(),
            strategies: vec![
                StrategySource::Inline,
                StrategySource::Online,
                StrategySource::Batch,
            ],
            concurrency: 4,
        }
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn is_enabled(&self, strategy: StrategySource) -> bool {
        self.strategies.contains(&strategy)
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn call_timeout_secs(mut self, secs: u64) -> Self {
        self.config.call_timeout_secs = secs.max(1);
        self
    }

    pub fn batch_timeout_secs(mut self, secs: u64) -> Self {
        self.config.batch_timeout_secs = secs.max(1);
        self
    }

    pub fn inline_page_limit(mut self, pages: usize) -> Self {
        self.config.inline_page_limit = pages;
        self
    }

    pub fn min_inline_chars(mut self, chars: usize) -> Self {
        self.config.min_inline_chars = chars;
        self
    }

    pub fn max_selected_pages(mut self, pages: usize) -> Self {
        self.config.max_selected_pages = pages.max(1);
        self
    }

    pub fn target_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.target_keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn keyword_window(mut self, chars: usize) -> Self {
        self.config.keyword_window = chars;
        self
    }

    pub fn max_code_candidates(mut self, n: usize) -> Self {
        self.config.max_code_candidates = n.max(1);
        self
    }

    pub fn prompt_corpus_chars(mut self, n: usize) -> Self {
        self.config.prompt_corpus_chars = n;
        self
    }

    pub fn variant_threshold(mut self, n: usize) -> Self {
        self.config.variant_threshold = n;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn batch_output_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.batch_output_prefix = prefix.into();
        self
    }

    pub fn strategies(mut self, strategies: Vec<StrategySource>) -> Self {
        self.config.strategies = strategies;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, CatalogError> {
        let c = &self.config;
        if c.inline_page_limit == 0 {
            return Err(CatalogError::Config(
                "inline page limit must be ≥ 1".into(),
            ));
        }
        if c.variant_threshold < 2 {
            return Err(CatalogError::Config(format!(
                "variant threshold must be ≥ 2, got {}",
                c.variant_threshold
            )));
        }
        if c.max_tokens == 0 {
            return Err(CatalogError::Config("max tokens must be ≥ 1".into()));
        }
        if c.strategies.contains(&StrategySource::Empty) {
            return Err(CatalogError::Config(
                "'empty' is the terminal fallback, not a selectable strategy".into(),
            ));
        }
        if !c.batch_output_prefix.contains("://") {
            return Err(CatalogError::Config(format!(
                "batch output prefix must be a scheme://bucket/path URI, got '{}'",
                c.batch_output_prefix
            )));
        }
        Ok(self.config)
    }
}
