//! Builder for configuring dispatcher instances

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::Dispatcher;
use crate::Result;
use crate::clock::{Clock, SystemClock};
use crate::config::{ApiKeys, Config};
use crate::learning::{BestModelQuery, LearningStore};
use crate::providers::{ProviderClient, RetryConfig, build_clients};
use crate::ratelimit::RateLimiter;
use crate::registry::ProviderRegistry;
use crate::rollout::RolloutManager;
use crate::versions::VersionStore;

/// Builder for [`Dispatcher`].
///
/// By default every registry provider gets its built-in HTTP transport,
/// with keys read from the environment. Clients added with
/// [`client`](Self::client) replace the built-in one for their provider.
pub struct DispatcherBuilder {
    registry: Option<ProviderRegistry>,
    clients: Vec<Arc<dyn ProviderClient>>,
    builtin_transports: bool,
    api_keys: Option<ApiKeys>,
    retry: RetryConfig,
    clock: Arc<dyn Clock>,
    call_timeout: Duration,
    selection: BestModelQuery,
    learning: Option<Arc<LearningStore>>,
    versions: Option<Arc<VersionStore>>,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self {
            registry: None,
            clients: Vec::new(),
            builtin_transports: true,
            api_keys: None,
            retry: RetryConfig::default(),
            clock: Arc::new(SystemClock),
            call_timeout: Duration::from_secs(30),
            selection: BestModelQuery::default(),
            learning: None,
            versions: None,
        }
    }

    /// Start from a loaded configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new()
            .registry(config.registry()?)
            .retry(config.retry.clone())
            .call_timeout(config.dispatcher.call_timeout())
            .min_usage_count(config.dispatcher.min_usage_count)
            .min_quality_score(config.dispatcher.min_quality_score))
    }

    /// Use a custom provider catalog (default: [`ProviderRegistry::builtin`]).
    pub fn registry(mut self, registry: ProviderRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Register a transport, replacing any other for the same provider.
    pub fn client(mut self, client: Arc<dyn ProviderClient>) -> Self {
        self.clients.push(client);
        self
    }

    /// Only use transports registered with [`client`](Self::client).
    pub fn without_builtin_transports(mut self) -> Self {
        self.builtin_transports = false;
        self
    }

    /// API keys for the built-in transports (default: from environment).
    pub fn api_keys(mut self, keys: ApiKeys) -> Self {
        self.api_keys = Some(keys);
        self
    }

    /// Retry policy for the built-in transports.
    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.retry = config;
        self
    }

    /// Time source for quota windows, learning and rollouts.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Upper bound on one provider call (default: 30s).
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Minimum uses before a learned model is preferred (default: 10).
    pub fn min_usage_count(mut self, n: u64) -> Self {
        self.selection = self.selection.min_usage_count(n);
        self
    }

    /// Minimum average quality for a learned model (default: 0.5).
    pub fn min_quality_score(mut self, score: f64) -> Self {
        self.selection = self.selection.min_quality_score(score);
        self
    }

    /// Share an existing learning store.
    pub fn learning(mut self, store: Arc<LearningStore>) -> Self {
        self.learning = Some(store);
        self
    }

    /// Share an existing version store.
    pub fn versions(mut self, store: Arc<VersionStore>) -> Self {
        self.versions = Some(store);
        self
    }

    /// Build the dispatcher.
    pub fn build(self) -> Result<Dispatcher> {
        let registry = Arc::new(self.registry.unwrap_or_default());

        let mut clients: HashMap<_, Arc<dyn ProviderClient>> = HashMap::new();
        if self.builtin_transports {
            let keys = self.api_keys.unwrap_or_else(ApiKeys::from_env);
            for client in build_clients(&registry, &keys, self.call_timeout, &self.retry)? {
                clients.insert(client.kind(), client);
            }
        }
        for client in self.clients {
            clients.insert(client.kind(), client);
        }

        let learning = self
            .learning
            .unwrap_or_else(|| Arc::new(LearningStore::new(self.clock.clone())));
        let versions = self
            .versions
            .unwrap_or_else(|| Arc::new(VersionStore::new(self.clock.clone())));
        let rollouts = Arc::new(RolloutManager::new(
            versions.clone(),
            learning.clone(),
            self.clock.clone(),
        ));
        let limiter = Arc::new(RateLimiter::new(&registry, self.clock));

        Ok(Dispatcher {
            registry,
            clients,
            limiter,
            learning,
            versions,
            rollouts,
            selection: self.selection,
            call_timeout: self.call_timeout,
        })
    }
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}
