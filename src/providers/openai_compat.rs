//! Client for OpenAI-compatible `chat/completions` endpoints.
//!
//! OpenRouter and Cerebras speak the same wire format. OpenRouter gets a
//! task-specific system message plus attribution headers; Cerebras gets the
//! bare user message.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::http::{build_client, check_status};
use super::traits::ProviderClient;
use crate::types::{CallOptions, Completion, ModelRef, ProviderKind, system_prompt_for_task};
use crate::{ConductorError, Result};

/// Client for one OpenAI-compatible provider.
#[derive(Clone)]
pub struct ChatCompletionsClient {
    kind: ProviderKind,
    http: Client,
    base_url: String,
    api_key: Option<String>,
    extra_headers: Vec<(String, String)>,
    system_prompt: bool,
}

impl ChatCompletionsClient {
    /// OpenRouter client. The key is optional on the free tier.
    pub fn openrouter(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            kind: ProviderKind::OpenRouter,
            http: build_client(timeout)?,
            base_url: base_url.into(),
            api_key,
            extra_headers: Vec::new(),
            system_prompt: true,
        })
    }

    /// Cerebras client.
    pub fn cerebras(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            kind: ProviderKind::Cerebras,
            http: build_client(timeout)?,
            base_url: base_url.into(),
            api_key,
            extra_headers: Vec::new(),
            system_prompt: false,
        })
    }

    /// Add a header sent with every request (e.g. `HTTP-Referer`, `X-Title`).
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }

    fn messages<'a>(&self, prompt: &'a str, options: &CallOptions) -> Vec<Message<'a>> {
        let mut messages = Vec::with_capacity(2);
        if self.system_prompt {
            messages.push(Message {
                role: "system",
                content: system_prompt_for_task(&options.task_type),
            });
        }
        messages.push(Message {
            role: "user",
            content: prompt,
        });
        messages
    }
}

#[async_trait]
impl ProviderClient for ChatCompletionsClient {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn generate(
        &self,
        prompt: &str,
        model: &ModelRef,
        options: &CallOptions,
    ) -> Result<Completion> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let model_id = model.wire_id();
        let body = ChatRequest {
            model: &model_id,
            messages: self.messages(prompt, options),
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        };

        let mut request = self.http.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        for (name, value) in &self.extra_headers {
            request = request.header(name.as_str(), value.as_str());
        }

        debug!(provider = %self.kind, model = %model_id, "chat completion request");
        let response = check_status(request.send().await?, self.kind.as_str()).await?;
        let parsed: ChatResponse = response.json().await?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(ConductorError::EmptyResponse)?;
        Ok(Completion {
            content,
            tokens: parsed.usage.map_or(0, |u| u.total_tokens),
        })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    total_tokens: u64,
}
