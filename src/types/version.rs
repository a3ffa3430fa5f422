//! Model version records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{PerformanceSummary, ProviderKind};

/// How a version record came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionEntryKind {
    Initial,
    Upgrade,
    Rollback,
}

/// One entry in a model's version history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub provider: ProviderKind,
    pub model: String,
    pub version: String,
    pub previous_version: Option<String>,
    pub current: bool,
    pub released: DateTime<Utc>,
    pub deprecated: Option<DateTime<Utc>>,
    pub improvements: Vec<String>,
    /// Aggregate performance captured when this version was promoted.
    pub baseline: Option<PerformanceSummary>,
    pub kind: VersionEntryKind,
    pub rollback_reason: Option<String>,
}

/// Side-by-side view of two recorded versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionComparison {
    pub from: ModelVersion,
    pub to: ModelVersion,
    /// `to - from` baseline quality, when both baselines exist.
    pub quality_delta: Option<f64>,
    /// `to - from` baseline latency in milliseconds.
    pub latency_delta_ms: Option<f64>,
    /// Improvements listed on `to` but not on `from`.
    pub new_improvements: Vec<String>,
}
