//! Model listing types.

use serde::{Deserialize, Serialize};

use super::ProviderKind;

/// A model offered by a provider's free tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Full model identifier (e.g. "qwen/qwen-2.5-7b-instruct:free").
    pub id: String,
    /// Short display name: the segment after the last `/`.
    pub name: String,
    pub provider: ProviderKind,
    pub free: bool,
}

impl ModelInfo {
    pub fn new(id: impl Into<String>, provider: ProviderKind) -> Self {
        let id = id.into();
        let name = id.rsplit('/').next().unwrap_or(&id).to_string();
        Self {
            id,
            name,
            provider,
            free: true,
        }
    }
}

/// A model pinned to a specific version.
///
/// Transports receive the combined `model:version` identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelRef {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl ModelRef {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            version: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Identifier sent to the provider.
    pub fn wire_id(&self) -> String {
        match &self.version {
            Some(v) => format!("{}:{v}", self.model),
            None => self.model.clone(),
        }
    }
}
