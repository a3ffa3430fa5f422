//! Model version history.
//!
//! [`VersionStore`] keeps every version record ever created for a
//! (provider, model), newest last. At most one record per pair has
//! `current = true`; [`promote`](VersionStore::promote) and
//! [`rollback`](VersionStore::rollback) flip the flag under a single write
//! lock so no reader ever observes zero or two current versions.
//!
//! Rollback never deletes anything: it appends a new record pointing back at
//! the target version, so the abandoned version's history stays auditable.

pub mod rollback;
pub mod upgrade;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::info;

use crate::clock::Clock;
use crate::types::{
    ModelVersion, PerformanceSummary, ProviderKind, VersionComparison, VersionEntryKind,
};
use crate::{ConductorError, Result};

pub use rollback::{RollbackCheck, RollbackCriteria, RollbackManager};
pub use upgrade::{UpgradeOptions, UpgradeOutcome, UpgradeRecommendation, Upgrader};

/// Version assigned to models seen for the first time.
pub const INITIAL_VERSION: &str = "1.0.0";

type VersionKey = (ProviderKind, String);

/// In-process store of model version records.
pub struct VersionStore {
    histories: RwLock<HashMap<VersionKey, Vec<ModelVersion>>>,
    clock: Arc<dyn Clock>,
}

impl VersionStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            histories: RwLock::new(HashMap::new()),
            clock,
        }
    }

    fn key(provider: ProviderKind, model: &str) -> VersionKey {
        (provider, model.to_string())
    }

    /// The current version, if any.
    pub fn current(&self, provider: ProviderKind, model: &str) -> Option<ModelVersion> {
        let histories = self.histories.read().unwrap_or_else(PoisonError::into_inner);
        histories
            .get(&Self::key(provider, model))
            .and_then(|h| h.iter().rev().find(|v| v.current))
            .cloned()
    }

    /// The version live traffic should be pinned to outside any rollout.
    ///
    /// `None` while the current version is the one the model was first
    /// registered with (also after rolling back to it), so never-upgraded
    /// models keep their bare wire id.
    pub fn serving_version(&self, provider: ProviderKind, model: &str) -> Option<String> {
        let histories = self.histories.read().unwrap_or_else(PoisonError::into_inner);
        let history = histories.get(&Self::key(provider, model))?;
        let current = history.iter().rev().find(|v| v.current)?;
        let initial = history.iter().find(|v| v.kind == VersionEntryKind::Initial);
        match initial {
            Some(first) if first.version == current.version => None,
            _ => Some(current.version.clone()),
        }
    }

    /// Register `version` as current if the model has no current version yet.
    ///
    /// Returns the current version either way.
    pub fn ensure_initial(&self, provider: ProviderKind, model: &str, version: &str) -> ModelVersion {
        let mut histories = self.histories.write().unwrap_or_else(PoisonError::into_inner);
        let history = histories.entry(Self::key(provider, model)).or_default();
        if let Some(current) = history.iter().rev().find(|v| v.current) {
            return current.clone();
        }
        let record = ModelVersion {
            provider,
            model: model.to_string(),
            version: version.to_string(),
            previous_version: None,
            current: true,
            released: self.clock.now(),
            deprecated: None,
            improvements: Vec::new(),
            baseline: None,
            kind: VersionEntryKind::Initial,
            rollback_reason: None,
        };
        history.push(record.clone());
        info!(provider = %provider, model, version, "initial model version registered");
        record
    }

    /// Full history, newest first.
    pub fn history(&self, provider: ProviderKind, model: &str) -> Vec<ModelVersion> {
        let histories = self.histories.read().unwrap_or_else(PoisonError::into_inner);
        histories
            .get(&Self::key(provider, model))
            .map(|h| h.iter().rev().cloned().collect())
            .unwrap_or_default()
    }

    /// Make `new_version` current.
    ///
    /// The previous current record is flipped to non-current and stamped
    /// deprecated in the same critical section. `baseline` is the aggregate
    /// performance observed before the switch, kept for rollback decisions.
    pub fn promote(
        &self,
        provider: ProviderKind,
        model: &str,
        new_version: &str,
        baseline: Option<PerformanceSummary>,
        improvements: Vec<String>,
    ) -> Result<ModelVersion> {
        self.switch(
            provider,
            model,
            new_version,
            baseline,
            improvements,
            VersionEntryKind::Upgrade,
            None,
        )
    }

    /// Make an earlier version current again.
    ///
    /// `target_version` must already appear in the history. A new record of
    /// kind [`VersionEntryKind::Rollback`] documents the reason; the
    /// abandoned version stays in the history, deprecated.
    pub fn rollback(
        &self,
        provider: ProviderKind,
        model: &str,
        target_version: &str,
        reason: &str,
    ) -> Result<ModelVersion> {
        let baseline = {
            let histories = self.histories.read().unwrap_or_else(PoisonError::into_inner);
            let history = histories.get(&Self::key(provider, model)).ok_or_else(|| {
                ConductorError::NotFound(format!("no versions recorded for {provider}:{model}"))
            })?;
            let target = history
                .iter()
                .rev()
                .find(|v| v.version == target_version)
                .ok_or_else(|| {
                    ConductorError::NotFound(format!(
                        "version '{target_version}' of {provider}:{model}"
                    ))
                })?;
            if target.current {
                return Err(ConductorError::Validation(format!(
                    "version '{target_version}' is already current"
                )));
            }
            target.baseline
        };
        self.switch(
            provider,
            model,
            target_version,
            baseline,
            Vec::new(),
            VersionEntryKind::Rollback,
            Some(reason.to_string()),
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn switch(
        &self,
        provider: ProviderKind,
        model: &str,
        version: &str,
        baseline: Option<PerformanceSummary>,
        improvements: Vec<String>,
        kind: VersionEntryKind,
        reason: Option<String>,
    ) -> Result<ModelVersion> {
        if version.trim().is_empty() {
            return Err(ConductorError::Validation("version must not be empty".into()));
        }
        let now = self.clock.now();
        let mut histories = self.histories.write().unwrap_or_else(PoisonError::into_inner);
        let history = histories.entry(Self::key(provider, model)).or_default();

        let mut previous = None;
        for record in history.iter_mut().filter(|v| v.current) {
            record.current = false;
            record.deprecated = Some(now);
            previous = Some(record.version.clone());
        }

        let record = ModelVersion {
            provider,
            model: model.to_string(),
            version: version.to_string(),
            previous_version: previous.clone(),
            current: true,
            released: now,
            deprecated: None,
            improvements,
            baseline,
            kind,
            rollback_reason: reason,
        };
        history.push(record.clone());

        info!(
            provider = %provider,
            model,
            old_version = previous.as_deref().unwrap_or("none"),
            new_version = version,
            kind = ?kind,
            "model version switched"
        );
        Ok(record)
    }

    /// Compare the latest records of two versions.
    pub fn compare(
        &self,
        provider: ProviderKind,
        model: &str,
        from: &str,
        to: &str,
    ) -> Result<VersionComparison> {
        let histories = self.histories.read().unwrap_or_else(PoisonError::into_inner);
        let history = histories.get(&Self::key(provider, model)).ok_or_else(|| {
            ConductorError::NotFound(format!("no versions recorded for {provider}:{model}"))
        })?;
        let find = |version: &str| {
            history
                .iter()
                .rev()
                .find(|v| v.version == version)
                .cloned()
                .ok_or_else(|| {
                    ConductorError::NotFound(format!("version '{version}' of {provider}:{model}"))
                })
        };
        let from = find(from)?;
        let to = find(to)?;

        let (quality_delta, latency_delta_ms) = match (from.baseline, to.baseline) {
            (Some(a), Some(b)) => (
                Some(b.avg_quality - a.avg_quality),
                Some(b.avg_latency_ms - a.avg_latency_ms),
            ),
            _ => (None, None),
        };
        let new_improvements = to
            .improvements
            .iter()
            .filter(|i| !from.improvements.contains(i))
            .cloned()
            .collect();

        Ok(VersionComparison {
            from,
            to,
            quality_delta,
            latency_delta_ms,
            new_improvements,
        })
    }
}
