//! Generation dispatcher.
//!
//! Every request walks the same state machine:
//!
//! ```text
//!  select model ─► rollout bucket ─► quota gate ─► provider call ─► record ─► done
//!       ▲                               │               │
//!       │          gate rejected        │  call failed  │
//!       └───── (fallback provider, at most once) ◄──────┘
//! ```
//!
//! - The gate reserves a request slot before the call; the slot is released
//!   if the call fails, committed with the token count if it succeeds.
//! - Only the universal default provider is used as fallback, and only once.
//!   A gate rejection at the fallback is returned as-is (with its retry-after
//!   hint); a failed fallback call becomes [`ConductorError::ServiceUnavailable`].
//! - Outside a rollout cohort, calls are pinned to the model's current
//!   version unless that is still the version it was first registered with.
//! - Scoring, learning and rollout metrics are side channels. They never fail
//!   a request.
//! - No lock is held while a provider call is in flight.

mod builder;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

pub use builder::DispatcherBuilder;

use crate::learning::{BestModelQuery, InsightsFilter, LearningStore};
use crate::providers::ProviderClient;
use crate::ratelimit::{RateLimitStatus, RateLimiter};
use crate::registry::ProviderRegistry;
use crate::rollout::RolloutManager;
use crate::scoring::quality_score;
use crate::telemetry;
use crate::types::{
    CallOptions, GenerateOptions, GenerateResponse, LearningInsights, ModelChoice, ModelRef,
    ProviderDescriptor, ProviderKind, RolloutOutcome,
};
use crate::versions::VersionStore;
use crate::{ConductorError, Result};

/// A provider descriptor with its live quota state.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderOverview {
    pub descriptor: ProviderDescriptor,
    pub rate_limit: RateLimitStatus,
    pub has_client: bool,
}

/// (provider, model) chosen for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Selection {
    provider: ProviderKind,
    model: String,
}

/// Why a single attempt failed.
enum AttemptError {
    /// Local quota gate rejected the request; nothing was sent.
    Gate(ConductorError),
    /// The transport call failed or timed out.
    Call(ConductorError),
}

/// Routes generation requests across providers.
///
/// Build with [`Dispatcher::builder`].
pub struct Dispatcher {
    registry: Arc<ProviderRegistry>,
    clients: HashMap<ProviderKind, Arc<dyn ProviderClient>>,
    limiter: Arc<RateLimiter>,
    learning: Arc<LearningStore>,
    versions: Arc<VersionStore>,
    rollouts: Arc<RolloutManager>,
    selection: BestModelQuery,
    call_timeout: Duration,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    /// Generate text for `prompt`.
    ///
    /// Fails with [`ConductorError::Validation`] for an empty prompt or task
    /// type, [`ConductorError::RateLimitExceeded`] when the fallback's quota
    /// is exhausted too, and [`ConductorError::ServiceUnavailable`] when the
    /// fallback call fails.
    #[instrument(skip(self, prompt, options), fields(task_type = %options.task_type))]
    pub async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<GenerateResponse> {
        validate_request(prompt, &options.task_type)?;

        let primary = self.select(options)?;
        let err = match self.attempt(prompt, options, &primary).await {
            Ok(response) => return Ok(response),
            Err(e) => e,
        };

        let fallback = self.registry.default_provider();
        if primary.provider == fallback {
            return Err(match err {
                AttemptError::Gate(e) => e,
                AttemptError::Call(e) => unavailable(fallback, &e),
            });
        }

        warn!(
            from = %primary.provider,
            to = %fallback,
            model = %primary.model,
            error = %err_ref(&err),
            "falling back to default provider"
        );
        metrics::counter!(telemetry::FALLBACKS_TOTAL,
            "from" => primary.provider.as_str(),
            "to" => fallback.as_str(),
        )
        .increment(1);

        let selection = self.select_fallback(options, fallback);
        match self.attempt(prompt, options, &selection).await {
            Ok(mut response) => {
                response.fallback_used = true;
                Ok(response)
            }
            Err(AttemptError::Gate(e)) => Err(e),
            Err(AttemptError::Call(e)) => Err(unavailable(fallback, &e)),
        }
    }

    /// One call to an exact (provider, model, version), bypassing model
    /// selection, rollouts, fallback and learning.
    ///
    /// Still subject to the quota gate. Used by the version tester.
    #[instrument(skip(self, prompt, provider, options), fields(provider = %provider))]
    pub async fn generate_pinned(
        &self,
        prompt: &str,
        provider: ProviderKind,
        model: &str,
        version: Option<&str>,
        options: &GenerateOptions,
    ) -> Result<GenerateResponse> {
        validate_request(prompt, &options.task_type)?;
        self.registry.get(provider)?;

        let permit = self.limiter.acquire(provider)?;
        let mut model_ref = ModelRef::new(model);
        if let Some(v) = version {
            model_ref = model_ref.with_version(v);
        }
        let started = Instant::now();
        let completion = self
            .call(provider, prompt, &model_ref, &CallOptions::from(options))
            .await?;
        let elapsed = started.elapsed();
        permit.commit(completion.tokens);

        Ok(GenerateResponse {
            quality_score: quality_score(&completion.content, elapsed),
            content: completion.content,
            model: model.to_string(),
            version: version.map(str::to_owned),
            provider,
            tokens: completion.tokens,
            response_time: elapsed,
            fallback_used: false,
        })
    }

    /// Model selection for the primary attempt.
    fn select(&self, options: &GenerateOptions) -> Result<Selection> {
        match (options.provider, options.model.as_deref()) {
            (Some(provider), Some(model)) => {
                self.registry.get(provider)?;
                Ok(Selection {
                    provider,
                    model: model.to_string(),
                })
            }
            (None, Some(model)) => {
                let provider = self
                    .registry
                    .kinds()
                    .into_iter()
                    .find(|p| self.registry.contains_model(*p, model))
                    .unwrap_or_else(|| self.registry.default_provider());
                Ok(Selection {
                    provider,
                    model: model.to_string(),
                })
            }
            (Some(provider), None) => self.select_for_provider(provider, &options.task_type),
            (None, None) => Ok(
                match self.learning.best_model_for_task(&options.task_type, &self.selection) {
                    ModelChoice::Learned(record) => {
                        debug!(
                            provider = %record.key.provider,
                            model = %record.key.model,
                            avg_quality = record.avg_quality,
                            "using learned model"
                        );
                        Selection {
                            provider: record.key.provider,
                            model: record.key.model,
                        }
                    }
                    ModelChoice::NoData => Selection {
                        provider: self.registry.default_provider(),
                        model: self.registry.default_model().to_string(),
                    },
                },
            ),
        }
    }

    /// Learned best on `provider`, else its first catalog model.
    fn select_for_provider(&self, provider: ProviderKind, task_type: &str) -> Result<Selection> {
        let query = self.selection.provider(provider);
        if let Some(record) = self.learning.best_model_for_task(task_type, &query).learned() {
            return Ok(Selection {
                provider,
                model: record.key.model.clone(),
            });
        }
        let descriptor = self.registry.get(provider)?;
        let model = if provider == self.registry.default_provider() {
            self.registry.default_model()
        } else {
            descriptor.default_model().ok_or_else(|| {
                ConductorError::Configuration(format!("provider {provider} lists no models"))
            })?
        };
        Ok(Selection {
            provider,
            model: model.to_string(),
        })
    }

    /// Model selection on the fallback provider.
    ///
    /// An explicit model survives only if the fallback provider serves it.
    fn select_fallback(&self, options: &GenerateOptions, fallback: ProviderKind) -> Selection {
        if let Some(model) = options.model.as_deref()
            && self.registry.contains_model(fallback, model)
        {
            return Selection {
                provider: fallback,
                model: model.to_string(),
            };
        }
        self.select_for_provider(fallback, &options.task_type)
            .unwrap_or_else(|_| Selection {
                provider: fallback,
                model: self.registry.default_model().to_string(),
            })
    }

    /// The rollout version this caller should see, if any.
    fn rollout_version(&self, selection: &Selection, user_id: Option<&str>) -> Option<String> {
        let active = self.rollouts.active_for(selection.provider, &selection.model);
        if active.is_empty() {
            return None;
        }
        let chosen = active.into_iter().find(|r| {
            self.rollouts.should_use_new_version(
                selection.provider,
                &selection.model,
                &r.to_version,
                user_id,
            )
        });
        let cohort = if chosen.is_some() { "new" } else { "current" };
        metrics::counter!(telemetry::ROLLOUT_ASSIGNMENTS_TOTAL, "cohort" => cohort).increment(1);
        chosen.map(|r| r.to_version)
    }

    /// Rollout check, quota gate, call and bookkeeping for one (provider, model).
    async fn attempt(
        &self,
        prompt: &str,
        options: &GenerateOptions,
        selection: &Selection,
    ) -> std::result::Result<GenerateResponse, AttemptError> {
        let provider = selection.provider;
        let rollout = self.rollout_version(selection, options.user_id.as_deref());
        let version = rollout
            .clone()
            .or_else(|| self.versions.serving_version(provider, &selection.model));

        let permit = self.limiter.acquire(provider).map_err(AttemptError::Gate)?;

        let mut model_ref = ModelRef::new(selection.model.clone());
        if let Some(v) = &version {
            model_ref = model_ref.with_version(v.clone());
        }
        let started = Instant::now();
        let result = self
            .call(provider, prompt, &model_ref, &CallOptions::from(options))
            .await;
        let elapsed = started.elapsed();

        let completion = match result {
            Ok(c) => c,
            Err(e) => {
                // Permit dropped here: the slot is released.
                drop(permit);
                if let Some(v) = &rollout {
                    self.record_rollout(selection, v, RolloutOutcome::Failure);
                }
                return Err(AttemptError::Call(e));
            }
        };

        permit.commit(completion.tokens);
        let quality = quality_score(&completion.content, elapsed);
        self.learning.record_sample(
            provider,
            &selection.model,
            &options.task_type,
            quality,
            elapsed,
            completion.tokens,
        );
        if let Some(v) = &rollout {
            self.record_rollout(
                selection,
                v,
                RolloutOutcome::Success {
                    quality,
                    response_time_ms: elapsed.as_secs_f64() * 1000.0,
                },
            );
        }

        info!(
            provider = %provider,
            model = %selection.model,
            version = version.as_deref().unwrap_or("current"),
            tokens = completion.tokens,
            quality,
            elapsed_ms = elapsed.as_millis() as u64,
            "generation complete"
        );
        Ok(GenerateResponse {
            content: completion.content,
            model: selection.model.clone(),
            version,
            provider,
            tokens: completion.tokens,
            response_time: elapsed,
            quality_score: quality,
            fallback_used: false,
        })
    }

    /// Transport call with the call timeout and request metrics.
    async fn call(
        &self,
        provider: ProviderKind,
        prompt: &str,
        model: &ModelRef,
        options: &CallOptions,
    ) -> Result<crate::types::Completion> {
        let client = self.clients.get(&provider).ok_or_else(|| {
            ConductorError::ServiceUnavailable(format!("no transport configured for {provider}"))
        })?;

        let started = Instant::now();
        let result = match tokio::time::timeout(
            self.call_timeout,
            client.generate(prompt, model, options),
        )
        .await
        {
            Ok(inner) => inner,
            Err(_) => Err(ConductorError::Timeout(self.call_timeout)),
        };

        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(telemetry::REQUESTS_TOTAL,
            "provider" => provider.as_str(),
            "status" => status,
        )
        .increment(1);
        metrics::histogram!(telemetry::REQUEST_DURATION_SECONDS,
            "provider" => provider.as_str(),
        )
        .record(started.elapsed().as_secs_f64());
        if let Ok(c) = &result {
            metrics::counter!(telemetry::TOKENS_TOTAL, "provider" => provider.as_str())
                .increment(c.tokens);
        }
        if let Err(e) = &result {
            warn!(provider = %provider, model = %model.wire_id(), error = %e, "provider call failed");
        }
        result
    }

    fn record_rollout(&self, selection: &Selection, version: &str, outcome: RolloutOutcome) {
        if let Err(e) =
            self.rollouts
                .record_outcome(selection.provider, &selection.model, version, outcome)
        {
            warn!(
                provider = %selection.provider,
                model = %selection.model,
                version,
                error = %e,
                "failed to record rollout outcome"
            );
        }
    }

    // ========================================================================
    // Admin surface
    // ========================================================================

    /// Every provider with its current quota state.
    pub fn providers(&self) -> Vec<ProviderOverview> {
        self.registry
            .list()
            .into_iter()
            .filter_map(|d| {
                let rate_limit = self.limiter.status(d.id).ok()?;
                Some(ProviderOverview {
                    descriptor: d.clone(),
                    rate_limit,
                    has_client: self.clients.contains_key(&d.id),
                })
            })
            .collect()
    }

    pub fn learning_insights(&self, filter: &InsightsFilter) -> LearningInsights {
        self.learning.insights(filter)
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn learning(&self) -> &Arc<LearningStore> {
        &self.learning
    }

    pub fn versions(&self) -> &Arc<VersionStore> {
        &self.versions
    }

    pub fn rollouts(&self) -> &Arc<RolloutManager> {
        &self.rollouts
    }
}

fn validate_request(prompt: &str, task_type: &str) -> Result<()> {
    if prompt.trim().is_empty() {
        return Err(ConductorError::Validation("prompt must not be empty".into()));
    }
    if task_type.trim().is_empty() {
        return Err(ConductorError::Validation("task type must not be empty".into()));
    }
    Ok(())
}

fn unavailable(fallback: ProviderKind, cause: &ConductorError) -> ConductorError {
    ConductorError::ServiceUnavailable(format!(
        "all providers failed (fallback {fallback}: {cause})"
    ))
}

fn err_ref(err: &AttemptError) -> &ConductorError {
    match err {
        AttemptError::Gate(e) | AttemptError::Call(e) => e,
    }
}
