//! Generation request and response types

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ProviderKind;

/// Default task type when the caller does not specify one.
pub const DEFAULT_TASK_TYPE: &str = "content-generation";

/// Options for a generation request (provider-agnostic)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub task_type: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Stable caller identity for sticky rollout bucketing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            provider: None,
            model: None,
            task_type: DEFAULT_TASK_TYPE.to_string(),
            temperature: 0.7,
            max_tokens: 2000,
            user_id: None,
        }
    }
}

impl GenerateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provider(mut self, provider: ProviderKind) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn task_type(mut self, task: impl Into<String>) -> Self {
        self.task_type = task.into();
        self
    }

    pub fn temperature(mut self, temp: f32) -> Self {
        self.temperature = temp;
        self
    }

    pub fn max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = max;
        self
    }

    pub fn user_id(mut self, user: impl Into<String>) -> Self {
        self.user_id = Some(user.into());
        self
    }
}

/// Parameters handed to a provider transport.
#[derive(Debug, Clone, PartialEq)]
pub struct CallOptions {
    pub task_type: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl From<&GenerateOptions> for CallOptions {
    fn from(opts: &GenerateOptions) -> Self {
        Self {
            task_type: opts.task_type.clone(),
            temperature: opts.temperature,
            max_tokens: opts.max_tokens,
        }
    }
}

/// Raw provider output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub content: String,
    /// Tokens reported by the provider; 0 when it does not report usage.
    pub tokens: u64,
}

/// Result of a dispatched generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub content: String,
    pub model: String,
    /// Rollout version used, if the request was bucketed into one.
    pub version: Option<String>,
    pub provider: ProviderKind,
    pub tokens: u64,
    pub response_time: Duration,
    pub quality_score: f64,
    /// Whether the fallback provider answered.
    pub fallback_used: bool,
}

/// System prompt for a task type.
pub fn system_prompt_for_task(task_type: &str) -> &'static str {
    match task_type {
        "content-generation" => {
            "You are a creative content writer specializing in social media content."
        }
        "caption-generation" => "You are an expert at creating engaging social media captions.",
        "hashtag-generation" => "You are a hashtag research expert.",
        "content-optimization" => "You are a content optimization specialist.",
        "translation" => "You are a professional translator.",
        _ => "You are a helpful AI assistant.",
    }
}
