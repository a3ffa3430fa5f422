//! Provider registry: static catalog of free-tier providers.
//!
//! The registry is built once at startup (usually from [`ProviderRegistry::builtin`]
//! plus config overrides) and shared immutably afterwards. It answers three
//! questions for the rest of the crate:
//! 1. What are a provider's free-tier ceilings? (rate limiter)
//! 2. Which models does a provider serve? (dispatcher model selection)
//! 3. Who is the universal default? (dispatcher fallback)

use std::collections::BTreeMap;

use crate::types::{FreeTierLimits, ModelInfo, ProviderDescriptor, ProviderKind};
use crate::{ConductorError, Result};

/// Default model on the default provider.
pub const DEFAULT_MODEL: &str = "qwen/qwen-2.5-7b-instruct:free";

/// Catalog of provider descriptors.
///
/// Iteration order follows [`ProviderKind`] ordering, which puts the
/// universal default (OpenRouter) first.
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    providers: BTreeMap<ProviderKind, ProviderDescriptor>,
    default_provider: ProviderKind,
    default_model: String,
}

impl ProviderRegistry {
    /// Create a registry from explicit descriptors.
    ///
    /// The first descriptor becomes the default provider and its first
    /// model the default model.
    pub fn new(descriptors: Vec<ProviderDescriptor>) -> Result<Self> {
        let first = descriptors
            .first()
            .ok_or_else(|| ConductorError::Configuration("provider registry is empty".into()))?;
        let default_provider = first.id;
        let default_model = first
            .default_model()
            .ok_or_else(|| {
                ConductorError::Configuration(format!("provider {default_provider} lists no models"))
            })?
            .to_string();
        let providers = descriptors.into_iter().map(|d| (d.id, d)).collect();
        Ok(Self {
            providers,
            default_provider,
            default_model,
        })
    }

    /// The built-in free-tier catalog.
    pub fn builtin() -> Self {
        let providers = builtin_descriptors()
            .into_iter()
            .map(|d| (d.id, d))
            .collect();
        Self {
            providers,
            default_provider: ProviderKind::OpenRouter,
            default_model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Look up a provider descriptor.
    pub fn get(&self, provider: ProviderKind) -> Result<&ProviderDescriptor> {
        self.providers
            .get(&provider)
            .ok_or_else(|| ConductorError::NotFound(format!("provider '{provider}'")))
    }

    /// All descriptors in registry order.
    pub fn list(&self) -> Vec<&ProviderDescriptor> {
        self.providers.values().collect()
    }

    /// Provider ids in registry order.
    pub fn kinds(&self) -> Vec<ProviderKind> {
        self.providers.keys().copied().collect()
    }

    /// Models offered by a provider. Unknown providers yield an empty list.
    pub fn models(&self, provider: ProviderKind) -> Vec<ModelInfo> {
        self.providers
            .get(&provider)
            .map(|d| {
                d.models
                    .iter()
                    .map(|m| ModelInfo::new(m.clone(), provider))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether `provider` lists `model` in its catalog.
    pub fn contains_model(&self, provider: ProviderKind, model: &str) -> bool {
        self.providers
            .get(&provider)
            .is_some_and(|d| d.has_model(model))
    }

    /// Universal default provider, also the fallback target.
    pub fn default_provider(&self) -> ProviderKind {
        self.default_provider
    }

    /// Model used when learning has nothing to offer.
    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Change the default (fallback) provider and model.
    pub fn set_default(&mut self, provider: ProviderKind, model: impl Into<String>) -> Result<()> {
        let model = model.into();
        if !self.contains_model(provider, &model) {
            return Err(ConductorError::Configuration(format!(
                "default model '{model}' is not offered by {provider}"
            )));
        }
        self.default_provider = provider;
        self.default_model = model;
        Ok(())
    }

    /// Overlay limit overrides onto a provider's free-tier ceilings.
    pub fn override_limits(&mut self, provider: ProviderKind, limits: FreeTierLimits) -> Result<()> {
        let descriptor = self
            .providers
            .get_mut(&provider)
            .ok_or_else(|| ConductorError::NotFound(format!("provider '{provider}'")))?;
        descriptor.limits = descriptor.limits.merged(limits);
        Ok(())
    }

    /// Point a provider at a different endpoint (proxies, test servers).
    pub fn override_base_url(&mut self, provider: ProviderKind, base_url: impl Into<String>) -> Result<()> {
        let descriptor = self
            .providers
            .get_mut(&provider)
            .ok_or_else(|| ConductorError::NotFound(format!("provider '{provider}'")))?;
        descriptor.base_url = base_url.into();
        Ok(())
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn builtin_descriptors() -> Vec<ProviderDescriptor> {
    vec![
        ProviderDescriptor {
            id: ProviderKind::OpenRouter,
            display_name: "OpenRouter".into(),
            base_url: "https://openrouter.ai/api/v1".into(),
            limits: FreeTierLimits::unlimited()
                .requests_per_day(50)
                .requests_per_minute(20),
            models: vec![
                DEFAULT_MODEL.into(),
                "google/gemini-flash-1.5:free".into(),
            ],
            requires_auth: false,
        },
        ProviderDescriptor {
            id: ProviderKind::HuggingFace,
            display_name: "Hugging Face".into(),
            base_url: "https://api-inference.huggingface.co/models".into(),
            limits: FreeTierLimits::unlimited().requests_per_day(1000),
            models: vec![
                "meta-llama/Llama-3.2-3B-Instruct".into(),
                "mistralai/Mistral-7B-Instruct-v0.2".into(),
                "google/gemma-2b-it".into(),
            ],
            requires_auth: true,
        },
        ProviderDescriptor {
            id: ProviderKind::Cerebras,
            display_name: "Cerebras".into(),
            base_url: "https://api.cerebras.ai/v1".into(),
            limits: FreeTierLimits::unlimited().tokens_per_day(1_000_000),
            models: vec![
                "llama-3.1-8b-instruct".into(),
                "qwen-2.5-7b-instruct".into(),
            ],
            requires_auth: false,
        },
        ProviderDescriptor {
            id: ProviderKind::Replicate,
            display_name: "Replicate".into(),
            base_url: "https://api.replicate.com/v1".into(),
            // Credit based; no request ceiling to enforce locally.
            limits: FreeTierLimits::unlimited(),
            models: vec![
                "meta/llama-3-8b-instruct".into(),
                "mistralai/mistral-7b-instruct-v0.2".into(),
            ],
            requires_auth: true,
        },
    ]
}
