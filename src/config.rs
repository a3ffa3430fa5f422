//! Configuration loading.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. explicit path (CLI flag)
//! 2. `~/.conductor/config.toml` (user)
//! 3. `/etc/conductor/config.toml` (system)
//!
//! Every section is optional. API keys never live in the file; they are read
//! from the provider environment variables (see [`ApiKeys::from_env`]).
//!
//! ```toml
//! [dispatcher]
//! fallback_provider = "openrouter"
//! call_timeout_secs = 30
//!
//! [providers.openrouter]
//! requests_per_day = 200
//!
//! [providers.cerebras]
//! base_url = "http://localhost:8080/v1"
//!
//! [rollout]
//! initial_percentage = 5
//!
//! [retry]
//! max_attempts = 2
//! initial_delay = 250   # milliseconds
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::providers::RetryConfig;
use crate::registry::ProviderRegistry;
use crate::types::{FreeTierLimits, ProviderKind, RolloutOptions};
use crate::{ConductorError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub dispatcher: DispatcherConfig,
    /// Per-provider overrides, keyed by provider id.
    pub providers: BTreeMap<String, ProviderOverride>,
    /// Defaults for new rollouts.
    pub rollout: RolloutOptions,
    pub retry: RetryConfig,
}

/// Dispatcher behaviour.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Universal fallback provider (default: openrouter).
    pub fallback_provider: ProviderKind,
    /// Model used on the fallback provider. Defaults to its first catalog model.
    pub default_model: Option<String>,
    /// Upper bound on a single provider call, retries included (default: 30).
    pub call_timeout_secs: u64,
    /// Learned choices need at least this many uses (default: 10).
    pub min_usage_count: u64,
    /// Learned choices need at least this average quality (default: 0.5).
    pub min_quality_score: f64,
    /// How often the rollout scheduler checks for due increments (default: 3600).
    pub rollout_check_interval_secs: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            fallback_provider: ProviderKind::OpenRouter,
            default_model: None,
            call_timeout_secs: 30,
            min_usage_count: 10,
            min_quality_score: 0.5,
            rollout_check_interval_secs: 3600,
        }
    }
}

impl DispatcherConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn rollout_check_interval(&self) -> Duration {
        Duration::from_secs(self.rollout_check_interval_secs.max(1))
    }
}

/// Overrides for one provider.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProviderOverride {
    pub base_url: Option<String>,
    /// Limit fields set here replace the built-in ceilings.
    #[serde(flatten)]
    pub limits: FreeTierLimits,
}

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// Fails if no file exists. See [`load_or_default`](Self::load_or_default).
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        match Self::resolve_config_path(explicit_path)? {
            Some(path) => Self::load_from_file(&path),
            None => Err(ConductorError::Configuration(
                "No config file found. Create ~/.conductor/config.toml or /etc/conductor/config.toml"
                    .to_string(),
            )),
        }
    }

    /// Like [`load`](Self::load), but a missing file yields the defaults.
    ///
    /// An explicit path that does not exist is still an error.
    pub fn load_or_default(explicit_path: Option<&Path>) -> Result<Self> {
        match Self::resolve_config_path(explicit_path)? {
            Some(path) => Self::load_from_file(&path),
            None => Ok(Self::default()),
        }
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| ConductorError::Configuration(format!("Failed to parse config: {e}")))
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            ConductorError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            ConductorError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
        })
    }

    fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(Some(path.to_path_buf()));
            }
            return Err(ConductorError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".conductor").join("config.toml");
            if user_config.exists() {
                return Ok(Some(user_config));
            }
        }

        let system_config = PathBuf::from("/etc/conductor/config.toml");
        if system_config.exists() {
            return Ok(Some(system_config));
        }
        Ok(None)
    }

    /// Built-in registry with this configuration's overrides applied.
    pub fn registry(&self) -> Result<ProviderRegistry> {
        let mut registry = ProviderRegistry::builtin();
        for (name, overrides) in &self.providers {
            let provider: ProviderKind = name.parse().map_err(|_| {
                ConductorError::Configuration(format!("unknown provider '{name}' in [providers]"))
            })?;
            registry.override_limits(provider, overrides.limits)?;
            if let Some(url) = &overrides.base_url {
                registry.override_base_url(provider, url.clone())?;
            }
        }

        let fallback = self.dispatcher.fallback_provider;
        let model = match &self.dispatcher.default_model {
            Some(m) => m.clone(),
            None => registry
                .get(fallback)?
                .default_model()
                .ok_or_else(|| {
                    ConductorError::Configuration(format!("provider {fallback} lists no models"))
                })?
                .to_string(),
        };
        registry.set_default(fallback, model)?;
        Ok(registry)
    }
}

/// Provider API keys.
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    keys: BTreeMap<ProviderKind, String>,
}

impl ApiKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read every provider's key from its environment variable.
    ///
    /// Empty values count as unset.
    pub fn from_env() -> Self {
        let keys = ProviderKind::ALL
            .into_iter()
            .filter_map(|p| {
                std::env::var(p.api_key_env())
                    .ok()
                    .filter(|k| !k.trim().is_empty())
                    .map(|k| (p, k))
            })
            .collect();
        Self { keys }
    }

    pub fn with(mut self, provider: ProviderKind, key: impl Into<String>) -> Self {
        self.keys.insert(provider, key.into());
        self
    }

    pub fn get(&self, provider: ProviderKind) -> Option<&str> {
        self.keys.get(&provider).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ProviderKind, &str)> {
        self.keys.iter().map(|(p, k)| (*p, k.as_str()))
    }
}
