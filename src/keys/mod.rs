//! API key validation.
//!
//! Each provider exposes a cheap authenticated endpoint that answers 401/403
//! for a bad key. [`KeyValidator`] probes it and caches the verdict for five
//! minutes, keyed by provider and a SHA-256 digest of the whole key (the raw
//! key is never stored).
//!
//! A probe that cannot reach the provider, or gets an unexpected status,
//! proves nothing about the key. Such keys are reported valid with a note
//! and are not cached, so the next check probes again.
//!
//! The validator is admin tooling and is not consulted on the dispatch path.

use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::future::Cache;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::Result;
use crate::config::ApiKeys;
use crate::providers::http::build_client;
use crate::types::ProviderKind;

const CACHE_TTL: Duration = Duration::from_secs(5 * 60);
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

type KeyDigest = [u8; 32];

fn digest(key: &str) -> KeyDigest {
    Sha256::digest(key.as_bytes()).into()
}

/// Probe base URLs, overridable for tests and proxies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEndpoints {
    pub openrouter: String,
    pub huggingface: String,
    pub cerebras: String,
    pub replicate: String,
}

impl Default for KeyEndpoints {
    fn default() -> Self {
        Self {
            openrouter: "https://openrouter.ai/api/v1".into(),
            huggingface: "https://huggingface.co/api".into(),
            cerebras: "https://api.cerebras.ai/v1".into(),
            replicate: "https://api.replicate.com/v1".into(),
        }
    }
}

impl KeyEndpoints {
    /// Point every probe at one server (e.g. a wiremock instance).
    pub fn all(base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            openrouter: base.clone(),
            huggingface: base.clone(),
            cerebras: base.clone(),
            replicate: base,
        }
    }

    fn probe_url(&self, provider: ProviderKind) -> String {
        let (base, path) = match provider {
            ProviderKind::OpenRouter => (&self.openrouter, "auth/key"),
            ProviderKind::HuggingFace => (&self.huggingface, "whoami-v2"),
            ProviderKind::Cerebras => (&self.cerebras, "models"),
            ProviderKind::Replicate => (&self.replicate, "account"),
        };
        format!("{}/{path}", base.trim_end_matches('/'))
    }
}

/// Verdict for one key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyValidation {
    pub provider: ProviderKind,
    pub valid: bool,
    /// Whether the provider actually answered the probe.
    pub verified: bool,
    /// Probe response body (account, limits, usage) when available.
    pub details: Option<serde_json::Value>,
    pub note: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// Per-provider key status for [`KeyValidator::status_all`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyStatus {
    pub provider: ProviderKind,
    pub configured: bool,
    pub validated: bool,
    pub details: Option<serde_json::Value>,
    pub last_validated: Option<DateTime<Utc>>,
    pub message: Option<String>,
}

/// Validates provider API keys against the providers themselves.
pub struct KeyValidator {
    http: Client,
    endpoints: KeyEndpoints,
    cache: Cache<(ProviderKind, KeyDigest), KeyValidation>,
}

impl KeyValidator {
    pub fn new() -> Result<Self> {
        Self::with_endpoints(KeyEndpoints::default())
    }

    pub fn with_endpoints(endpoints: KeyEndpoints) -> Result<Self> {
        Ok(Self {
            http: build_client(PROBE_TIMEOUT)?,
            endpoints,
            cache: Cache::builder().time_to_live(CACHE_TTL).build(),
        })
    }

    /// Validate `key` for `provider`.
    pub async fn validate(&self, provider: ProviderKind, key: &str) -> KeyValidation {
        let key = key.trim();
        if key.is_empty() {
            return KeyValidation {
                provider,
                valid: false,
                verified: false,
                details: None,
                note: Some("empty key".into()),
                checked_at: Utc::now(),
            };
        }

        let cache_key = (provider, digest(key));
        if let Some(hit) = self.cache.get(&cache_key).await {
            debug!(provider = %provider, "key validation cache hit");
            return hit;
        }

        let result = self.probe(provider, key).await;
        if result.verified {
            self.cache.insert(cache_key, result.clone()).await;
        }
        result
    }

    /// Validate every configured key; unconfigured providers are listed too.
    pub async fn status_all(&self, keys: &ApiKeys) -> Vec<KeyStatus> {
        let mut statuses = Vec::with_capacity(ProviderKind::ALL.len());
        for provider in ProviderKind::ALL {
            let status = match keys.get(provider) {
                Some(key) => {
                    let v = self.validate(provider, key).await;
                    KeyStatus {
                        provider,
                        configured: true,
                        validated: v.valid,
                        details: v.details,
                        last_validated: Some(v.checked_at),
                        message: v.note,
                    }
                }
                None => KeyStatus {
                    provider,
                    configured: false,
                    validated: false,
                    details: None,
                    last_validated: None,
                    message: Some(format!("{} is not set", provider.api_key_env())),
                },
            };
            statuses.push(status);
        }
        statuses
    }

    /// Forget every cached verdict.
    pub fn clear_cache(&self) {
        self.cache.invalidate_all();
        info!("API key validation cache cleared");
    }

    async fn probe(&self, provider: ProviderKind, key: &str) -> KeyValidation {
        let url = self.endpoints.probe_url(provider);
        let request = match provider {
            ProviderKind::Replicate => self.http.get(&url).header("Authorization", format!("Token {key}")),
            _ => self.http.get(&url).bearer_auth(key),
        };

        let unverified = |note: String| KeyValidation {
            provider,
            valid: true,
            verified: false,
            details: None,
            note: Some(note),
            checked_at: Utc::now(),
        };

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(provider = %provider, error = %e, "key validation probe failed; assuming valid");
                return unverified(format!("could not reach provider: {e}"));
            }
        };

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => KeyValidation {
                provider,
                valid: false,
                verified: true,
                details: None,
                note: Some(format!("provider rejected key ({})", response.status())),
                checked_at: Utc::now(),
            },
            s if s.is_success() => KeyValidation {
                provider,
                valid: true,
                verified: true,
                details: response.json::<serde_json::Value>().await.ok(),
                note: None,
                checked_at: Utc::now(),
            },
            s => {
                warn!(provider = %provider, status = %s, "unexpected key validation status; assuming valid");
                unverified(format!("unexpected status {s}"))
            }
        }
    }
}
