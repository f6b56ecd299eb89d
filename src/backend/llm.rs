//! Constrained generation over an `edgequake_llm` provider.

use super::{GenerationEngine, GenerationOptions};
use crate::error::{BackendError, CatalogError};
use crate::pipeline::postprocess::extract_json_object;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Model used when a provider is named without one.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// [`GenerationEngine`] backed by any [`LLMProvider`].
pub struct LlmGenerationEngine {
    provider: Arc<dyn LLMProvider>,
    model: String,
}

impl LlmGenerationEngine {
    pub fn new(provider: Arc<dyn LLMProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    /// Resolve a provider, from most-specific to least-specific:
    ///
    /// 1. **Named provider + model** (`provider_name`, `model`)
    /// 2. **Environment pair** (`CATALOG_LLM_PROVIDER` + `CATALOG_MODEL`)
    /// 3. **OpenAI key** (`OPENAI_API_KEY`) with `model` or [`DEFAULT_MODEL`]
    /// 4. **Full auto-detection** (`ProviderFactory::from_env`)
    pub fn resolve(provider_name: Option<&str>, model: Option<&str>) -> Result<Self, CatalogError> {
        if let Some(name) = provider_name.filter(|n| !n.is_empty()) {
            let model = model.unwrap_or(DEFAULT_MODEL);
            return Self::named(name, model);
        }

        if let (Ok(prov), Ok(env_model)) = (
            std::env::var("CATALOG_LLM_PROVIDER"),
            std::env::var("CATALOG_MODEL"),
        ) {
            if !prov.is_empty() && !env_model.is_empty() {
                return Self::named(&prov, &env_model);
            }
        }

        if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
            if !openai_key.is_empty() {
                return Self::named("openai", model.unwrap_or(DEFAULT_MODEL));
            }
        }

        let (llm_provider, _embedding) = ProviderFactory::from_env().map_err(|e| {
            CatalogError::Config(format!(
                "No LLM provider could be auto-detected from environment. \
                 Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or CATALOG_LLM_PROVIDER + CATALOG_MODEL. \
                 Error: {e}"
            ))
        })?;
        Ok(Self::new(llm_provider, model.unwrap_or("auto")))
    }

    fn named(provider_name: &str, model: &str) -> Result<Self, CatalogError> {
        let provider = ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
            CatalogError::Config(format!("provider '{provider_name}' is not usable: {e}"))
        })?;
        Ok(Self::new(provider, model))
    }
}

pub(crate) fn build_options(options: GenerationOptions) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(options.temperature),
        max_tokens: Some(options.max_output_tokens),
        ..Default::default()
    }
}

/// Parse a reply into a JSON object, tolerating fences and chatter.
pub(crate) fn parse_reply(content: &str) -> Result<Value, BackendError> {
    let json = extract_json_object(content)
        .ok_or_else(|| BackendError::Malformed("reply contains no JSON object".into()))?;
    let value: Value =
        serde_json::from_str(json).map_err(|e| BackendError::Malformed(e.to_string()))?;
    if value.is_object() {
        Ok(value)
    } else {
        Err(BackendError::Malformed("reply is not a JSON object".into()))
    }
}

#[async_trait]
impl GenerationEngine for LlmGenerationEngine {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate_json(
        &self,
        system: &str,
        payload: &Value,
        options: GenerationOptions,
    ) -> Result<Value, BackendError> {
        let messages = vec![
            ChatMessage::system(system),
            ChatMessage::user(&payload.to_string()),
        ];
        let response = self
            .provider
            .chat(&messages, Some(&build_options(options)))
            .await
            .map_err(|e| BackendError::Failed(e.to_string()))?;
        debug!(
            model = %self.model,
            chars = response.content.len(),
            "Generation reply received"
        );
        parse_reply(&response.content)
    }
}
