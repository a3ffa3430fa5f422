//! Gradual rollout records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ProviderKind;

/// Lifecycle of a rollout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RolloutStatus {
    Active,
    Paused,
    Completed,
    Cancelled,
}

/// Tunables supplied when a rollout starts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RolloutOptions {
    pub initial_percentage: u8,
    pub increment_percentage: u8,
    pub target_percentage: u8,
    pub min_days_between_increments: u32,
    /// Minimum `success / total` required to keep advancing.
    pub success_threshold: f64,
}

impl Default for RolloutOptions {
    fn default() -> Self {
        Self {
            initial_percentage: 10,
            increment_percentage: 10,
            target_percentage: 100,
            min_days_between_increments: 1,
            success_threshold: 0.9,
        }
    }
}

impl RolloutOptions {
    pub fn initial_percentage(mut self, pct: u8) -> Self {
        self.initial_percentage = pct;
        self
    }

    pub fn increment_percentage(mut self, pct: u8) -> Self {
        self.increment_percentage = pct;
        self
    }

    pub fn target_percentage(mut self, pct: u8) -> Self {
        self.target_percentage = pct;
        self
    }

    pub fn min_days_between_increments(mut self, days: u32) -> Self {
        self.min_days_between_increments = days;
        self
    }

    pub fn success_threshold(mut self, threshold: f64) -> Self {
        self.success_threshold = threshold;
        self
    }
}

/// Live traffic metrics for the new version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RolloutMetrics {
    pub total_requests: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub avg_quality: f64,
    pub avg_response_time_ms: f64,
}

impl RolloutMetrics {
    /// `None` until the first request is observed.
    pub fn success_rate(&self) -> Option<f64> {
        (self.total_requests > 0).then(|| self.success_count as f64 / self.total_requests as f64)
    }
}

/// Result of one request served by a rollout version.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RolloutOutcome {
    Success { quality: f64, response_time_ms: f64 },
    Failure,
}

/// A gradual rollout of `to_version` for one (provider, model).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rollout {
    /// `provider:model:to_version`
    pub id: String,
    pub provider: ProviderKind,
    pub model: String,
    pub from_version: String,
    pub to_version: String,
    pub current_percentage: u8,
    pub options: RolloutOptions,
    pub status: RolloutStatus,
    pub metrics: RolloutMetrics,
    pub started: DateTime<Utc>,
    pub last_increment: DateTime<Utc>,
    pub pause_reason: Option<String>,
    /// Release notes recorded on the version when the rollout completes.
    #[serde(default)]
    pub improvements: Vec<String>,
}

impl Rollout {
    pub fn make_id(provider: ProviderKind, model: &str, to_version: &str) -> String {
        format!("{provider}:{model}:{to_version}")
    }
}

/// What `increment_if_due` did to a rollout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncrementOutcome {
    /// Percentage advanced to the given value.
    Advanced(u8),
    /// Target reached; the new version is now current.
    Completed,
    /// Too soon since the last increment.
    NotDue,
    /// Success rate below threshold; rollout paused.
    Paused,
    /// Rollout is not active.
    Inactive,
}
