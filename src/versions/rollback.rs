//! Quality-regression detection and rollback.
//!
//! After a promotion, recent samples for the model are compared against the
//! baseline captured when the version became current. A rollback is
//! recommended only when all three hold:
//!
//! 1. at least `min_usage_count` samples since the upgrade,
//! 2. recent average quality below `min_quality_threshold`,
//! 3. recent average quality below the baseline.
//!
//! The recent window starts at the later of the promotion time and
//! `now - days_since_upgrade`, so samples from the previous version never
//! leak into the comparison.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::VersionStore;
use crate::clock::Clock;
use crate::learning::LearningStore;
use crate::types::{ModelVersion, ProviderKind, VersionEntryKind};
use crate::{ConductorError, Result};

/// Thresholds for [`RollbackManager::check_needed`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RollbackCriteria {
    pub min_quality_threshold: f64,
    pub min_usage_count: u64,
    pub days_since_upgrade: u32,
}

impl Default for RollbackCriteria {
    fn default() -> Self {
        Self {
            min_quality_threshold: 0.6,
            min_usage_count: 10,
            days_since_upgrade: 7,
        }
    }
}

impl RollbackCriteria {
    pub fn min_quality_threshold(mut self, threshold: f64) -> Self {
        self.min_quality_threshold = threshold;
        self
    }

    pub fn min_usage_count(mut self, n: u64) -> Self {
        self.min_usage_count = n;
        self
    }

    pub fn days_since_upgrade(mut self, days: u32) -> Self {
        self.days_since_upgrade = days;
        self
    }
}

/// Result of a regression check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackCheck {
    pub needed: bool,
    pub reason: String,
    pub current_version: Option<String>,
    /// Version a rollback would restore.
    pub rollback_to: Option<String>,
    pub recent_quality: Option<f64>,
    pub baseline_quality: Option<f64>,
    pub usage: u64,
}

impl RollbackCheck {
    fn not_needed(reason: impl Into<String>) -> Self {
        Self {
            needed: false,
            reason: reason.into(),
            current_version: None,
            rollback_to: None,
            recent_quality: None,
            baseline_quality: None,
            usage: 0,
        }
    }
}

/// Watches promoted versions and reverts them on regression.
pub struct RollbackManager {
    versions: Arc<VersionStore>,
    learning: Arc<LearningStore>,
    clock: Arc<dyn Clock>,
}

impl RollbackManager {
    pub fn new(
        versions: Arc<VersionStore>,
        learning: Arc<LearningStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            versions,
            learning,
            clock,
        }
    }

    /// Decide whether the current version of a model has regressed.
    pub fn check_needed(
        &self,
        provider: ProviderKind,
        model: &str,
        criteria: &RollbackCriteria,
    ) -> RollbackCheck {
        let Some(current) = self.versions.current(provider, model) else {
            return RollbackCheck::not_needed("no version history");
        };
        if current.kind != VersionEntryKind::Upgrade {
            return RollbackCheck {
                current_version: Some(current.version),
                ..RollbackCheck::not_needed("current version was not reached by an upgrade")
            };
        }
        let Some(previous) = current.previous_version.clone() else {
            return RollbackCheck {
                current_version: Some(current.version),
                ..RollbackCheck::not_needed("no previous version to roll back to")
            };
        };

        let now = self.clock.now();
        let window_start =
            (now - chrono::Duration::days(i64::from(criteria.days_since_upgrade))).max(current.released);
        let recent = self.learning.quality_since(provider, model, window_start);
        let baseline = current.baseline.map(|b| b.avg_quality);

        let mut check = RollbackCheck {
            needed: false,
            reason: String::new(),
            current_version: Some(current.version.clone()),
            rollback_to: Some(previous),
            recent_quality: (recent.usage_count > 0).then_some(recent.avg_quality),
            baseline_quality: baseline,
            usage: recent.usage_count,
        };

        if recent.usage_count < criteria.min_usage_count {
            check.reason = format!(
                "insufficient usage since upgrade ({} < {})",
                recent.usage_count, criteria.min_usage_count
            );
            return check;
        }
        if recent.avg_quality >= criteria.min_quality_threshold {
            check.reason = format!(
                "recent quality {:.3} meets threshold {:.3}",
                recent.avg_quality, criteria.min_quality_threshold
            );
            return check;
        }
        match baseline {
            Some(b) if recent.avg_quality < b => {
                check.needed = true;
                check.reason = format!(
                    "quality dropped from {b:.3} to {:.3} (threshold {:.3})",
                    recent.avg_quality, criteria.min_quality_threshold
                );
            }
            Some(b) => {
                check.reason = format!(
                    "recent quality {:.3} is not below baseline {b:.3}",
                    recent.avg_quality
                );
            }
            None => check.reason = "no baseline recorded for current version".into(),
        }
        check
    }

    /// Revert to `target_version`, or to the version the current one replaced.
    pub fn rollback(
        &self,
        provider: ProviderKind,
        model: &str,
        target_version: Option<&str>,
        reason: &str,
    ) -> Result<ModelVersion> {
        let target = match target_version {
            Some(v) => v.to_string(),
            None => self
                .versions
                .current(provider, model)
                .and_then(|c| c.previous_version)
                .ok_or_else(|| {
                    ConductorError::NotFound(format!(
                        "no previous version of {provider}:{model} to roll back to"
                    ))
                })?,
        };
        let record = self.versions.rollback(provider, model, &target, reason)?;
        warn!(provider = %provider, model, version = %target, reason, "model rolled back");
        Ok(record)
    }

    /// Earlier versions a rollback could restore, newest first.
    ///
    /// Each version appears once, with the baseline it carried when it was
    /// last current.
    pub fn rollback_candidates(&self, provider: ProviderKind, model: &str) -> Vec<ModelVersion> {
        let mut seen = Vec::new();
        let history = self.versions.history(provider, model);
        let Some(current) = history.iter().find(|v| v.current).map(|v| v.version.clone()) else {
            return Vec::new();
        };
        history
            .into_iter()
            .filter(|v| v.version != current)
            .filter(|v| {
                if seen.contains(&v.version) {
                    false
                } else {
                    seen.push(v.version.clone());
                    true
                }
            })
            .collect()
    }

    /// Run [`check_needed`](Self::check_needed) and roll back if it says so.
    ///
    /// Returns the new current record when a rollback happened.
    pub fn auto_rollback(
        &self,
        provider: ProviderKind,
        model: &str,
        criteria: &RollbackCriteria,
    ) -> Result<Option<ModelVersion>> {
        let check = self.check_needed(provider, model, criteria);
        if !check.needed {
            info!(provider = %provider, model, reason = %check.reason, "no rollback needed");
            return Ok(None);
        }
        self.rollback(provider, model, check.rollback_to.as_deref(), &check.reason)
            .map(Some)
    }
}
