//! Gradual rollouts with sticky user bucketing.
//!
//! ```text
//!   start ──► Active ──increment_if_due──► Active (pct += step) ──► … ──► Completed
//!               │  ▲                                                     (to_version
//!               │  │ resume                                               promoted)
//!   success < θ │  │
//!               ▼  │
//!             Paused ───cancel──► Cancelled
//! ```
//!
//! While a rollout is active, [`RolloutManager::should_use_new_version`]
//! decides per request whether the caller sees the new version. Outcomes
//! reported through [`RolloutManager::record_outcome`] feed the success rate
//! checked before every increment. A paused rollout serves no traffic on the
//! new version until resumed.
//!
//! Lock order is rollouts, then versions. The version store never calls back
//! into this module.

mod cohort;
mod scheduler;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{info, warn};

use crate::clock::Clock;
use crate::learning::LearningStore;
use crate::types::{
    IncrementOutcome, ProviderKind, Rollout, RolloutMetrics, RolloutOptions, RolloutOutcome,
    RolloutStatus,
};
use crate::versions::VersionStore;
use crate::{ConductorError, Result};

pub use cohort::{bucket, in_cohort};
pub use scheduler::spawn_scheduler;

/// Owns every rollout, active or finished.
///
/// Finished rollouts are kept for audit until a new rollout with the same
/// id replaces them.
pub struct RolloutManager {
    rollouts: RwLock<HashMap<String, Rollout>>,
    versions: Arc<VersionStore>,
    learning: Arc<LearningStore>,
    clock: Arc<dyn Clock>,
}

impl RolloutManager {
    pub fn new(
        versions: Arc<VersionStore>,
        learning: Arc<LearningStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            rollouts: RwLock::new(HashMap::new()),
            versions,
            learning,
            clock,
        }
    }

    /// Begin rolling `to_version` out over `from_version`.
    ///
    /// `from_version` must be the model's current version. Fails with
    /// [`ConductorError::Validation`] if a rollout with the same id is still
    /// active or paused.
    pub fn start(
        &self,
        provider: ProviderKind,
        model: &str,
        from_version: &str,
        to_version: &str,
        options: RolloutOptions,
    ) -> Result<Rollout> {
        self.start_with_improvements(provider, model, from_version, to_version, options, Vec::new())
    }

    /// Like [`start`](Self::start), carrying release notes that are recorded
    /// on `to_version` once it is promoted.
    pub fn start_with_improvements(
        &self,
        provider: ProviderKind,
        model: &str,
        from_version: &str,
        to_version: &str,
        options: RolloutOptions,
        improvements: Vec<String>,
    ) -> Result<Rollout> {
        validate_options(&options)?;
        if from_version == to_version {
            return Err(ConductorError::Validation(format!(
                "rollout target '{to_version}' equals the source version"
            )));
        }
        let current = self.versions.current(provider, model).ok_or_else(|| {
            ConductorError::NotFound(format!("no current version for {provider}:{model}"))
        })?;
        if current.version != from_version {
            return Err(ConductorError::Validation(format!(
                "current version of {provider}:{model} is '{}', not '{from_version}'",
                current.version
            )));
        }

        let id = Rollout::make_id(provider, model, to_version);
        let now = self.clock.now();
        let rollout = Rollout {
            id: id.clone(),
            provider,
            model: model.to_string(),
            from_version: from_version.to_string(),
            to_version: to_version.to_string(),
            current_percentage: options.initial_percentage,
            options,
            status: RolloutStatus::Active,
            metrics: RolloutMetrics::default(),
            started: now,
            last_increment: now,
            pause_reason: None,
            improvements,
        };

        let mut rollouts = self.rollouts.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = rollouts.get(&id)
            && matches!(existing.status, RolloutStatus::Active | RolloutStatus::Paused)
        {
            return Err(ConductorError::Validation(format!(
                "rollout '{id}' is already in progress"
            )));
        }
        rollouts.insert(id.clone(), rollout.clone());

        info!(
            rollout = %id,
            from_version,
            to_version,
            percentage = options.initial_percentage,
            "rollout started"
        );
        Ok(rollout)
    }

    /// Whether this request should be served by `version`.
    ///
    /// Read-only. Returns `false` unless an active rollout of exactly this
    /// version exists. Known users are bucketed deterministically; anonymous
    /// callers get a fresh draw.
    pub fn should_use_new_version(
        &self,
        provider: ProviderKind,
        model: &str,
        version: &str,
        user_id: Option<&str>,
    ) -> bool {
        let id = Rollout::make_id(provider, model, version);
        let rollouts = self.rollouts.read().unwrap_or_else(PoisonError::into_inner);
        match rollouts.get(&id) {
            Some(r) if r.status == RolloutStatus::Active => {
                in_cohort(user_id, &id, r.current_percentage)
            }
            _ => false,
        }
    }

    /// Active rollouts for a (provider, model), oldest first.
    pub fn active_for(&self, provider: ProviderKind, model: &str) -> Vec<Rollout> {
        let rollouts = self.rollouts.read().unwrap_or_else(PoisonError::into_inner);
        let mut active: Vec<_> = rollouts
            .values()
            .filter(|r| r.provider == provider && r.model == model)
            .filter(|r| r.status == RolloutStatus::Active)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.started.cmp(&b.started).then_with(|| a.id.cmp(&b.id)));
        active
    }

    /// Fold one request served by the new version into the rollout metrics.
    pub fn record_outcome(
        &self,
        provider: ProviderKind,
        model: &str,
        version: &str,
        outcome: RolloutOutcome,
    ) -> Result<()> {
        let id = Rollout::make_id(provider, model, version);
        let mut rollouts = self.rollouts.write().unwrap_or_else(PoisonError::into_inner);
        let rollout = rollouts
            .get_mut(&id)
            .ok_or_else(|| ConductorError::NotFound(format!("rollout '{id}'")))?;

        let m = &mut rollout.metrics;
        m.total_requests += 1;
        match outcome {
            RolloutOutcome::Success {
                quality,
                response_time_ms,
            } => {
                m.success_count += 1;
                let n = m.success_count as f64;
                m.avg_quality += (quality - m.avg_quality) / n;
                m.avg_response_time_ms += (response_time_ms - m.avg_response_time_ms) / n;
            }
            RolloutOutcome::Failure => m.failure_count += 1,
        }
        Ok(())
    }

    /// Advance a rollout one step if its interval has elapsed.
    ///
    /// Pauses the rollout instead when the observed success rate is below
    /// its threshold. Reaching the target promotes `to_version` in the
    /// version store, with the model's current aggregate as baseline.
    pub fn increment_if_due(&self, id: &str) -> Result<IncrementOutcome> {
        let now = self.clock.now();
        let mut rollouts = self.rollouts.write().unwrap_or_else(PoisonError::into_inner);
        let rollout = rollouts
            .get_mut(id)
            .ok_or_else(|| ConductorError::NotFound(format!("rollout '{id}'")))?;

        if rollout.status != RolloutStatus::Active {
            return Ok(IncrementOutcome::Inactive);
        }
        let interval = chrono::Duration::days(i64::from(rollout.options.min_days_between_increments));
        if now - rollout.last_increment < interval {
            return Ok(IncrementOutcome::NotDue);
        }

        if let Some(rate) = rollout.metrics.success_rate()
            && rate < rollout.options.success_threshold
        {
            let reason = format!(
                "success rate {rate:.3} below threshold {:.3}",
                rollout.options.success_threshold
            );
            warn!(rollout = %id, %reason, "rollout paused");
            rollout.status = RolloutStatus::Paused;
            rollout.pause_reason = Some(reason);
            return Ok(IncrementOutcome::Paused);
        }

        let target = rollout.options.target_percentage;
        let next = rollout
            .current_percentage
            .saturating_add(rollout.options.increment_percentage)
            .min(target);

        if next >= target {
            let baseline = self.learning.model_summary(rollout.provider, &rollout.model);
            self.versions.promote(
                rollout.provider,
                &rollout.model,
                &rollout.to_version,
                baseline,
                rollout
                    .improvements
                    .iter()
                    .cloned()
                    .chain([format!("gradual rollout {id}")])
                    .collect(),
            )?;
            rollout.current_percentage = target;
            rollout.last_increment = now;
            rollout.status = RolloutStatus::Completed;
            info!(rollout = %id, "rollout completed");
            return Ok(IncrementOutcome::Completed);
        }

        rollout.current_percentage = next;
        rollout.last_increment = now;
        info!(rollout = %id, percentage = next, "rollout advanced");
        Ok(IncrementOutcome::Advanced(next))
    }

    /// Run [`increment_if_due`](Self::increment_if_due) on every active rollout.
    pub fn increment_all_due(&self) -> Vec<(String, Result<IncrementOutcome>)> {
        let ids: Vec<String> = {
            let rollouts = self.rollouts.read().unwrap_or_else(PoisonError::into_inner);
            let mut ids: Vec<_> = rollouts
                .values()
                .filter(|r| r.status == RolloutStatus::Active)
                .map(|r| r.id.clone())
                .collect();
            ids.sort();
            ids
        };
        ids.into_iter()
            .map(|id| {
                let outcome = self.increment_if_due(&id);
                (id, outcome)
            })
            .collect()
    }

    /// Stop advancing and stop serving the new version.
    ///
    /// Pausing a paused rollout is a no-op.
    pub fn pause(&self, id: &str, reason: &str) -> Result<Rollout> {
        self.update(id, |r| match r.status {
            RolloutStatus::Active => {
                r.status = RolloutStatus::Paused;
                r.pause_reason = Some(reason.to_string());
                Ok(())
            }
            RolloutStatus::Paused => Ok(()),
            other => Err(finished(id, other)),
        })
    }

    /// Reactivate a paused rollout.
    ///
    /// Metrics are cleared and the increment interval restarts, so the next
    /// step is judged only on traffic observed after resuming.
    pub fn resume(&self, id: &str) -> Result<Rollout> {
        let now = self.clock.now();
        self.update(id, |r| match r.status {
            RolloutStatus::Paused => {
                r.status = RolloutStatus::Active;
                r.pause_reason = None;
                r.metrics = RolloutMetrics::default();
                r.last_increment = now;
                Ok(())
            }
            RolloutStatus::Active => Ok(()),
            other => Err(finished(id, other)),
        })
    }

    /// Abandon a rollout. The current version is left untouched.
    pub fn cancel(&self, id: &str, reason: &str) -> Result<Rollout> {
        self.update(id, |r| match r.status {
            RolloutStatus::Active | RolloutStatus::Paused => {
                r.status = RolloutStatus::Cancelled;
                r.pause_reason = Some(reason.to_string());
                Ok(())
            }
            RolloutStatus::Cancelled => Ok(()),
            RolloutStatus::Completed => Err(finished(id, RolloutStatus::Completed)),
        })
    }

    pub fn get(&self, id: &str) -> Option<Rollout> {
        self.rollouts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Every rollout, sorted by id.
    pub fn list(&self) -> Vec<Rollout> {
        let rollouts = self.rollouts.read().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<_> = rollouts.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    fn update(
        &self,
        id: &str,
        f: impl FnOnce(&mut Rollout) -> Result<()>,
    ) -> Result<Rollout> {
        let mut rollouts = self.rollouts.write().unwrap_or_else(PoisonError::into_inner);
        let rollout = rollouts
            .get_mut(id)
            .ok_or_else(|| ConductorError::NotFound(format!("rollout '{id}'")))?;
        let before = rollout.status;
        f(rollout)?;
        if rollout.status != before {
            info!(rollout = %id, from = ?before, to = ?rollout.status, "rollout status changed");
        }
        Ok(rollout.clone())
    }
}

fn finished(id: &str, status: RolloutStatus) -> ConductorError {
    ConductorError::Validation(format!("rollout '{id}' is already {status:?}"))
}

fn validate_options(options: &RolloutOptions) -> Result<()> {
    if options.target_percentage == 0 || options.target_percentage > 100 {
        return Err(ConductorError::Validation(
            "target_percentage must be in 1..=100".into(),
        ));
    }
    if options.initial_percentage > options.target_percentage {
        return Err(ConductorError::Validation(
            "initial_percentage must not exceed target_percentage".into(),
        ));
    }
    if options.increment_percentage == 0 {
        return Err(ConductorError::Validation(
            "increment_percentage must be positive".into(),
        ));
    }
    if !(0.0..=1.0).contains(&options.success_threshold) {
        return Err(ConductorError::Validation(
            "success_threshold must be in [0, 1]".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;

    fn manager() -> RolloutManager {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let versions = Arc::new(VersionStore::new(clock.clone()));
        versions.ensure_initial(ProviderKind::OpenRouter, "m", "1.0.0");
        let learning = Arc::new(LearningStore::new(clock.clone()));
        RolloutManager::new(versions, learning, clock)
    }

    #[test]
    fn rejects_invalid_options() {
        let mgr = manager();
        let err = mgr
            .start(
                ProviderKind::OpenRouter,
                "m",
                "1.0.0",
                "2.0.0",
                RolloutOptions::default().increment_percentage(0),
            )
            .unwrap_err();
        assert!(matches!(err, ConductorError::Validation(_)));
    }

    #[test]
    fn unknown_version_is_never_selected() {
        let mgr = manager();
        mgr.start(ProviderKind::OpenRouter, "m", "1.0.0", "2.0.0", RolloutOptions::default())
            .unwrap();
        assert!(!mgr.should_use_new_version(ProviderKind::OpenRouter, "m", "3.0.0", Some("u")));
    }

    #[test]
    fn running_means_track_successes_only() {
        let mgr = manager();
        mgr.start(ProviderKind::OpenRouter, "m", "1.0.0", "2.0.0", RolloutOptions::default())
            .unwrap();
        let ok = |q| RolloutOutcome::Success {
            quality: q,
            response_time_ms: 100.0,
        };
        mgr.record_outcome(ProviderKind::OpenRouter, "m", "2.0.0", ok(0.4)).unwrap();
        mgr.record_outcome(ProviderKind::OpenRouter, "m", "2.0.0", ok(0.8)).unwrap();
        mgr.record_outcome(ProviderKind::OpenRouter, "m", "2.0.0", RolloutOutcome::Failure)
            .unwrap();
        let m = mgr.get("openrouter:m:2.0.0").unwrap().metrics;
        assert_eq!(m.total_requests, 3);
        assert_eq!(m.failure_count, 1);
        assert!((m.avg_quality - 0.6).abs() < 1e-9);
    }
}
