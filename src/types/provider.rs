//! Provider identity and free-tier descriptors.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ConductorError;

/// Closed set of supported providers.
///
/// Adding a provider means adding a variant here, a descriptor in the
/// [`ProviderRegistry`](crate::registry::ProviderRegistry) and a
/// [`ProviderClient`](crate::providers::ProviderClient) implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenRouter,
    HuggingFace,
    Cerebras,
    Replicate,
}

impl ProviderKind {
    /// All providers in registry order.
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::OpenRouter,
        ProviderKind::HuggingFace,
        ProviderKind::Cerebras,
        ProviderKind::Replicate,
    ];

    /// Stable lowercase identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenRouter => "openrouter",
            ProviderKind::HuggingFace => "huggingface",
            ProviderKind::Cerebras => "cerebras",
            ProviderKind::Replicate => "replicate",
        }
    }

    /// Environment variable holding this provider's API key.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            ProviderKind::OpenRouter => "OPENROUTER_API_KEY",
            ProviderKind::HuggingFace => "HUGGINGFACE_API_KEY",
            ProviderKind::Cerebras => "CEREBRAS_API_KEY",
            ProviderKind::Replicate => "REPLICATE_API_KEY",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ConductorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProviderKind::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ConductorError::NotFound(format!("provider '{s}'")))
    }
}

/// Free-tier ceilings. `None` means the dimension is not limited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeTierLimits {
    #[serde(default)]
    pub requests_per_day: Option<u64>,
    #[serde(default)]
    pub tokens_per_day: Option<u64>,
    #[serde(default)]
    pub requests_per_minute: Option<u64>,
}

impl FreeTierLimits {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn requests_per_day(mut self, n: u64) -> Self {
        self.requests_per_day = Some(n);
        self
    }

    pub fn tokens_per_day(mut self, n: u64) -> Self {
        self.tokens_per_day = Some(n);
        self
    }

    pub fn requests_per_minute(mut self, n: u64) -> Self {
        self.requests_per_minute = Some(n);
        self
    }

    /// Overlay the set fields of `other` onto `self`.
    pub fn merged(self, other: FreeTierLimits) -> Self {
        Self {
            requests_per_day: other.requests_per_day.or(self.requests_per_day),
            tokens_per_day: other.tokens_per_day.or(self.tokens_per_day),
            requests_per_minute: other.requests_per_minute.or(self.requests_per_minute),
        }
    }
}

/// Static description of a provider, loaded once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub id: ProviderKind,
    pub display_name: String,
    pub base_url: String,
    pub limits: FreeTierLimits,
    pub models: Vec<String>,
    pub requires_auth: bool,
}

impl ProviderDescriptor {
    /// First catalog model, used when nothing better is known.
    pub fn default_model(&self) -> Option<&str> {
        self.models.first().map(String::as_str)
    }

    pub fn has_model(&self, model: &str) -> bool {
        self.models.iter().any(|m| m == model)
    }
}
