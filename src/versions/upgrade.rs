//! Automated upgrades.
//!
//! ```text
//!   auto_upgrade(v)
//!        │
//!        ├─ validate? ──► VersionTester::validate_before_upgrade ──✗──► Rejected
//!        │                                                       │
//!        │                                                       ✓
//!        ▼                                                       ▼
//!   gradual? ──yes──► RolloutManager::start ──────────────► RolloutStarted
//!        │
//!        no ───────► VersionStore::promote (baseline = learned summary) ──► Promoted
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use super::{INITIAL_VERSION, VersionStore};
use crate::abtest::VersionTester;
use crate::learning::LearningStore;
use crate::rollout::RolloutManager;
use crate::types::{ModelVersion, ProviderKind, Rollout, RolloutOptions};
use crate::{ConductorError, Result};

/// Models below this learned quality are flagged by
/// [`Upgrader::upgrade_recommendations`].
const RECOMMEND_BELOW_QUALITY: f64 = 0.6;
/// Use count a record must exceed before it is flagged.
const RECOMMEND_MIN_USAGE: u64 = 10;

/// How [`Upgrader::auto_upgrade`] proceeds.
#[derive(Debug, Clone, PartialEq)]
pub struct UpgradeOptions {
    /// Run an A/B validation first. Ignored when no tester is attached.
    pub validate: bool,
    /// Start a gradual rollout instead of promoting immediately.
    pub gradual: bool,
    pub rollout: RolloutOptions,
    pub improvements: Vec<String>,
}

impl Default for UpgradeOptions {
    fn default() -> Self {
        Self {
            validate: true,
            gradual: true,
            rollout: RolloutOptions::default(),
            improvements: Vec::new(),
        }
    }
}

impl UpgradeOptions {
    pub fn validate(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    pub fn gradual(mut self, gradual: bool) -> Self {
        self.gradual = gradual;
        self
    }

    pub fn rollout(mut self, options: RolloutOptions) -> Self {
        self.rollout = options;
        self
    }

    pub fn improvement(mut self, text: impl Into<String>) -> Self {
        self.improvements.push(text.into());
        self
    }
}

/// What an upgrade attempt did.
#[derive(Debug, Clone, PartialEq)]
pub enum UpgradeOutcome {
    RolloutStarted(Rollout),
    Promoted(ModelVersion),
    /// Validation failed; nothing changed.
    Rejected { reason: String },
}

/// A model whose learned performance suggests looking for a newer version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpgradeRecommendation {
    pub provider: ProviderKind,
    pub model: String,
    pub task_type: String,
    pub avg_quality: f64,
    pub usage_count: u64,
    pub reason: String,
}

/// Drives version upgrades through validation, rollout and promotion.
pub struct Upgrader {
    versions: Arc<VersionStore>,
    learning: Arc<LearningStore>,
    rollouts: Arc<RolloutManager>,
    tester: Option<Arc<VersionTester>>,
}

impl Upgrader {
    pub fn new(
        versions: Arc<VersionStore>,
        learning: Arc<LearningStore>,
        rollouts: Arc<RolloutManager>,
    ) -> Self {
        Self {
            versions,
            learning,
            rollouts,
            tester: None,
        }
    }

    /// Attach the A/B tester used for pre-upgrade validation.
    pub fn with_tester(mut self, tester: Arc<VersionTester>) -> Self {
        self.tester = Some(tester);
        self
    }

    /// Move `model` to `new_version`.
    ///
    /// Models with no history are first registered at the initial version.
    #[instrument(skip(self, provider, options), fields(provider = %provider))]
    pub async fn auto_upgrade(
        &self,
        provider: ProviderKind,
        model: &str,
        new_version: &str,
        options: UpgradeOptions,
    ) -> Result<UpgradeOutcome> {
        let current = self.versions.ensure_initial(provider, model, INITIAL_VERSION);
        if current.version == new_version {
            return Err(ConductorError::Validation(format!(
                "{provider}:{model} is already at version '{new_version}'"
            )));
        }

        if options.validate {
            match &self.tester {
                Some(tester) => {
                    let validation = tester
                        .validate_before_upgrade(provider, model, new_version)
                        .await?;
                    if !validation.valid {
                        warn!(model, new_version, reason = %validation.reason, "upgrade rejected");
                        return Ok(UpgradeOutcome::Rejected {
                            reason: validation.reason,
                        });
                    }
                }
                None => warn!(model, "no version tester attached; skipping validation"),
            }
        }

        if options.gradual {
            let rollout = self.rollouts.start_with_improvements(
                provider,
                model,
                &current.version,
                new_version,
                options.rollout,
                options.improvements,
            )?;
            return Ok(UpgradeOutcome::RolloutStarted(rollout));
        }

        let baseline = self.learning.model_summary(provider, model);
        let record =
            self.versions
                .promote(provider, model, new_version, baseline, options.improvements)?;
        info!(model, new_version, "model promoted without rollout");
        Ok(UpgradeOutcome::Promoted(record))
    }

    /// Learned (provider, model, task) records performing poorly enough to
    /// warrant an upgrade, worst first.
    pub fn upgrade_recommendations(&self) -> Vec<UpgradeRecommendation> {
        let mut recs: Vec<_> = self
            .learning
            .aggregates()
            .into_iter()
            .filter(|r| r.avg_quality < RECOMMEND_BELOW_QUALITY && r.usage_count > RECOMMEND_MIN_USAGE)
            .map(|r| UpgradeRecommendation {
                reason: format!(
                    "low quality score ({:.2}) over {} uses",
                    r.avg_quality, r.usage_count
                ),
                provider: r.key.provider,
                model: r.key.model,
                task_type: r.key.task_type,
                avg_quality: r.avg_quality,
                usage_count: r.usage_count,
            })
            .collect();
        recs.sort_by(|a, b| a.avg_quality.total_cmp(&b.avg_quality));
        recs
    }
}
