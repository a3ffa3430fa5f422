//! Learning record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ProviderKind;

/// Aggregation key: one record per (provider, model, task type).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LearningKey {
    pub provider: ProviderKind,
    pub model: String,
    pub task_type: String,
}

impl LearningKey {
    pub fn new(provider: ProviderKind, model: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            task_type: task.into(),
        }
    }
}

/// One observed call. Write-once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageSample {
    pub key: LearningKey,
    pub quality: f64,
    pub latency_ms: f64,
    pub tokens: u64,
    pub recorded_at: DateTime<Utc>,
}

/// Rolling aggregate for a [`LearningKey`].
///
/// Averages are always derived from the running totals so they cannot
/// drift from the simple mean of every sample seen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRecord {
    pub key: LearningKey,
    pub usage_count: u64,
    pub total_quality: f64,
    pub total_latency_ms: f64,
    pub total_tokens: u64,
    pub avg_quality: f64,
    pub avg_latency_ms: f64,
    pub avg_tokens: f64,
    pub last_used: DateTime<Utc>,
}

impl AggregateRecord {
    pub(crate) fn empty(key: LearningKey, now: DateTime<Utc>) -> Self {
        Self {
            key,
            usage_count: 0,
            total_quality: 0.0,
            total_latency_ms: 0.0,
            total_tokens: 0,
            avg_quality: 0.0,
            avg_latency_ms: 0.0,
            avg_tokens: 0.0,
            last_used: now,
        }
    }

    pub(crate) fn absorb(&mut self, sample: &UsageSample) {
        self.usage_count += 1;
        self.total_quality += sample.quality;
        self.total_latency_ms += sample.latency_ms;
        self.total_tokens += sample.tokens;
        let n = self.usage_count as f64;
        self.avg_quality = self.total_quality / n;
        self.avg_latency_ms = self.total_latency_ms / n;
        self.avg_tokens = self.total_tokens as f64 / n;
        self.last_used = sample.recorded_at;
    }
}

/// Confidence bucket for a recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    /// `high` above 0.7, `medium` above 0.5, otherwise `low`.
    pub fn from_quality(score: f64) -> Self {
        if score > 0.7 {
            Confidence::High
        } else if score > 0.5 {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }
}

/// Outcome of a best-model query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ModelChoice {
    /// A record met the usage and quality minimums.
    Learned(AggregateRecord),
    /// Nothing qualified; callers fall back to their default.
    NoData,
}

impl ModelChoice {
    pub fn learned(&self) -> Option<&AggregateRecord> {
        match self {
            ModelChoice::Learned(r) => Some(r),
            ModelChoice::NoData => None,
        }
    }
}

/// Quality/latency summary over a set of samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub usage_count: u64,
    pub avg_quality: f64,
    pub avg_latency_ms: f64,
    pub avg_tokens: f64,
}

/// Best model for one task type, as reported by insights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInsight {
    pub task_type: String,
    pub provider: ProviderKind,
    pub model: String,
    pub score: f64,
    pub usage: u64,
    pub confidence: Confidence,
    pub recommendation: String,
}

/// Summary of learning data across task types.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearningInsights {
    pub total_models: usize,
    pub best_models: Vec<TaskInsight>,
}
