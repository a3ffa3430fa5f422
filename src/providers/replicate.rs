//! Replicate predictions client.
//!
//! Replicate runs predictions asynchronously: the create call returns a
//! prediction id, which is polled until it leaves `starting`/`processing`.
//! The model reference is sent as the prediction `version`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::http::{build_client, check_status};
use super::traits::ProviderClient;
use crate::types::{CallOptions, Completion, ModelRef, ProviderKind};
use crate::{ConductorError, Result};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_MAX_POLLS: u32 = 120;

/// Client for the Replicate predictions API.
#[derive(Clone)]
pub struct ReplicateClient {
    api_key: Option<String>,
    http: Client,
    base_url: String,
    poll_interval: Duration,
    max_polls: u32,
}

impl ReplicateClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            api_key,
            http: build_client(timeout)?,
            base_url: base_url.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_polls: DEFAULT_MAX_POLLS,
        })
    }

    /// Change how often a running prediction is polled.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Give up after this many polls.
    pub fn max_polls(mut self, n: u32) -> Self {
        self.max_polls = n;
        self
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("Authorization", format!("Token {key}")),
            None => request,
        }
    }

    fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

#[async_trait]
impl ProviderClient for ReplicateClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Replicate
    }

    async fn generate(
        &self,
        prompt: &str,
        model: &ModelRef,
        options: &CallOptions,
    ) -> Result<Completion> {
        let version = model.wire_id();
        let create = self
            .authorize(self.http.post(format!("{}/predictions", self.base())))
            .json(&PredictionRequest {
                version: &version,
                input: PredictionInput {
                    prompt,
                    temperature: options.temperature,
                    max_length: options.max_tokens,
                },
            });
        let mut prediction: Prediction =
            check_status(create.send().await?, "replicate").await?.json().await?;

        let mut polls = 0;
        while prediction.is_running() {
            if polls >= self.max_polls {
                return Err(ConductorError::Timeout(self.poll_interval * self.max_polls));
            }
            polls += 1;
            tokio::time::sleep(self.poll_interval).await;
            let url = format!("{}/predictions/{}", self.base(), prediction.id);
            prediction = check_status(
                self.authorize(self.http.get(&url)).send().await?,
                "replicate",
            )
            .await?
            .json()
            .await?;
            debug!(id = %prediction.id, status = %prediction.status, polls, "prediction polled");
        }

        match prediction.status.as_str() {
            "succeeded" => {}
            "failed" | "canceled" => {
                return Err(ConductorError::Api {
                    status: 422,
                    message: prediction
                        .error
                        .unwrap_or_else(|| format!("prediction {}", prediction.status)),
                });
            }
            other => {
                return Err(ConductorError::Api {
                    status: 502,
                    message: format!("unexpected prediction status '{other}'"),
                });
            }
        }

        let content = match prediction.output {
            Some(Output::Chunks(chunks)) => chunks.concat(),
            Some(Output::Text(text)) => text,
            None => return Err(ConductorError::EmptyResponse),
        };
        Ok(Completion { content, tokens: 0 })
    }
}

#[derive(Serialize)]
struct PredictionRequest<'a> {
    version: &'a str,
    input: PredictionInput<'a>,
}

#[derive(Serialize)]
struct PredictionInput<'a> {
    prompt: &'a str,
    temperature: f32,
    max_length: u32,
}

#[derive(Deserialize)]
struct Prediction {
    id: String,
    status: String,
    #[serde(default)]
    output: Option<Output>,
    #[serde(default)]
    error: Option<String>,
}

impl Prediction {
    fn is_running(&self) -> bool {
        matches!(self.status.as_str(), "starting" | "processing")
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Output {
    Chunks(Vec<String>),
    Text(String),
}
