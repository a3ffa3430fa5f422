//! Hugging Face serverless inference client for text generation.
//!
//! See: <https://huggingface.co/docs/api-inference/index>

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::http::{build_client, check_status};
use super::traits::ProviderClient;
use crate::types::{CallOptions, Completion, ModelRef, ProviderKind};
use crate::{ConductorError, Result};

/// Client for the Hugging Face Inference API.
///
/// The API does not report token usage, so completions carry `tokens = 0`.
#[derive(Clone)]
pub struct HuggingFaceClient {
    api_key: Option<String>,
    http: Client,
    base_url: String,
}

impl HuggingFaceClient {
    /// Create a client against `base_url` (the `/models` root).
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            api_key,
            http: build_client(timeout)?,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl ProviderClient for HuggingFaceClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::HuggingFace
    }

    async fn generate(
        &self,
        prompt: &str,
        model: &ModelRef,
        options: &CallOptions,
    ) -> Result<Completion> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), model.wire_id());
        let mut request = self.http.post(&url).json(&GenerateRequest {
            inputs: prompt,
            parameters: Parameters {
                max_new_tokens: options.max_tokens,
                return_full_text: false,
            },
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = check_status(request.send().await?, "huggingface").await?;
        // Either `[{"generated_text": ..}]` or `{"generated_text": ..}`.
        let parsed: GenerateResponse = response.json().await?;
        let content = match parsed {
            GenerateResponse::Many(items) => items.into_iter().next().map(|i| i.generated_text),
            GenerateResponse::One(item) => Some(item.generated_text),
        }
        .ok_or(ConductorError::EmptyResponse)?;

        Ok(Completion { content, tokens: 0 })
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    inputs: &'a str,
    parameters: Parameters,
}

#[derive(Serialize)]
struct Parameters {
    max_new_tokens: u32,
    return_full_text: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum GenerateResponse {
    Many(Vec<Generated>),
    One(Generated),
}

#[derive(Deserialize)]
struct Generated {
    generated_text: String,
}
