//! Continuous-learning store.
//!
//! Two kinds of data live here:
//!
//! - **Raw samples**: one [`UsageSample`] per dispatched call, write-once, kept
//!   in a bounded ring (oldest evicted first). Windowed queries such as
//!   "quality since the last upgrade" read these.
//! - **Aggregates**: one [`AggregateRecord`] per (provider, model, task type),
//!   updated incrementally as running sums. Averages are recomputed from the
//!   sums on every update.
//!
//! Both sit behind a single `RwLock`; reads (model selection on every request)
//! vastly outnumber writes.
//!
//! This store is in-process. Persisting it to a document or relational store
//! is the embedding application's job; records are `serde`-serialisable for
//! that purpose.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::clock::Clock;
use crate::types::{
    AggregateRecord, Confidence, LearningInsights, LearningKey, ModelChoice, PerformanceSummary,
    ProviderKind, TaskInsight, UsageSample,
};

/// Default capacity of the raw sample ring.
pub const DEFAULT_SAMPLE_CAPACITY: usize = 100_000;

/// Filters for [`LearningStore::best_model_for_task`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestModelQuery {
    pub provider: Option<ProviderKind>,
    pub min_usage_count: u64,
    pub min_quality_score: f64,
}

impl Default for BestModelQuery {
    fn default() -> Self {
        Self {
            provider: None,
            min_usage_count: 10,
            min_quality_score: 0.5,
        }
    }
}

impl BestModelQuery {
    pub fn provider(mut self, provider: ProviderKind) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn min_usage_count(mut self, n: u64) -> Self {
        self.min_usage_count = n;
        self
    }

    pub fn min_quality_score(mut self, score: f64) -> Self {
        self.min_quality_score = score;
        self
    }
}

/// Filters for [`LearningStore::insights`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsightsFilter {
    pub provider: Option<ProviderKind>,
    pub task_type: Option<String>,
    /// Only records used within this many days.
    pub days: Option<u32>,
}

#[derive(Default)]
struct Inner {
    aggregates: HashMap<LearningKey, AggregateRecord>,
    samples: VecDeque<UsageSample>,
}

/// In-process learning store.
pub struct LearningStore {
    inner: RwLock<Inner>,
    capacity: usize,
    clock: Arc<dyn Clock>,
}

impl LearningStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_capacity(clock, DEFAULT_SAMPLE_CAPACITY)
    }

    /// Create a store keeping at most `capacity` raw samples.
    pub fn with_capacity(clock: Arc<dyn Clock>, capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            capacity: capacity.max(1),
            clock,
        }
    }

    /// Record one call and fold it into its aggregate.
    ///
    /// Returns the updated aggregate.
    pub fn record_sample(
        &self,
        provider: ProviderKind,
        model: &str,
        task_type: &str,
        quality: f64,
        latency: Duration,
        tokens: u64,
    ) -> AggregateRecord {
        let now = self.clock.now();
        let sample = UsageSample {
            key: LearningKey::new(provider, model, task_type),
            quality,
            latency_ms: latency.as_secs_f64() * 1000.0,
            tokens,
            recorded_at: now,
        };

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let record = inner
            .aggregates
            .entry(sample.key.clone())
            .or_insert_with(|| AggregateRecord::empty(sample.key.clone(), now));
        record.absorb(&sample);
        let updated = record.clone();

        inner.samples.push_back(sample);
        while inner.samples.len() > self.capacity {
            inner.samples.pop_front();
        }

        debug!(
            provider = %provider,
            model,
            task_type,
            avg_quality = updated.avg_quality,
            usage_count = updated.usage_count,
            "model performance updated"
        );
        updated
    }

    /// Aggregate for one key.
    pub fn aggregate(&self, provider: ProviderKind, model: &str, task_type: &str) -> Option<AggregateRecord> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .aggregates
            .get(&LearningKey::new(provider, model, task_type))
            .cloned()
    }

    /// All aggregates, sorted by key.
    pub fn aggregates(&self) -> Vec<AggregateRecord> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut records: Vec<_> = inner.aggregates.values().cloned().collect();
        records.sort_by(|a, b| a.key.cmp(&b.key));
        records
    }

    /// Best aggregate for a task type.
    ///
    /// Highest average quality wins; ties go to the more used record. Records
    /// below either minimum are never returned.
    pub fn best_model_for_task(&self, task_type: &str, query: &BestModelQuery) -> ModelChoice {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .aggregates
            .values()
            .filter(|r| r.key.task_type == task_type)
            .filter(|r| query.provider.is_none_or(|p| r.key.provider == p))
            .filter(|r| r.usage_count >= query.min_usage_count)
            .filter(|r| r.avg_quality >= query.min_quality_score)
            .max_by(|a, b| {
                a.avg_quality
                    .total_cmp(&b.avg_quality)
                    .then(a.usage_count.cmp(&b.usage_count))
                    // Deterministic among exact ties.
                    .then_with(|| b.key.cmp(&a.key))
            })
            .cloned()
            .map_or(ModelChoice::NoData, ModelChoice::Learned)
    }

    /// Summary of a (provider, model) across all task types.
    ///
    /// Used as the baseline snapshot when a version is promoted.
    pub fn model_summary(&self, provider: ProviderKind, model: &str) -> Option<PerformanceSummary> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut count = 0u64;
        let (mut quality, mut latency, mut tokens) = (0.0, 0.0, 0u64);
        for r in inner
            .aggregates
            .values()
            .filter(|r| r.key.provider == provider && r.key.model == model)
        {
            count += r.usage_count;
            quality += r.total_quality;
            latency += r.total_latency_ms;
            tokens += r.total_tokens;
        }
        (count > 0).then(|| summarize(count, quality, latency, tokens))
    }

    /// Summary of raw samples for a (provider, model) recorded at or after `since`.
    pub fn quality_since(&self, provider: ProviderKind, model: &str, since: DateTime<Utc>) -> PerformanceSummary {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut count = 0u64;
        let (mut quality, mut latency, mut tokens) = (0.0, 0.0, 0u64);
        for s in inner.samples.iter().rev() {
            if s.recorded_at < since {
                // Samples are appended in clock order.
                break;
            }
            if s.key.provider == provider && s.key.model == model {
                count += 1;
                quality += s.quality;
                latency += s.latency_ms;
                tokens += s.tokens;
            }
        }
        if count == 0 {
            return PerformanceSummary::default();
        }
        summarize(count, quality, latency, tokens)
    }

    /// Number of raw samples currently retained.
    pub fn sample_count(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .samples
            .len()
    }

    /// Best model per task type plus a recommendation for each.
    pub fn insights(&self, filter: &InsightsFilter) -> LearningInsights {
        let since = filter
            .days
            .map(|d| self.clock.now() - chrono::Duration::days(i64::from(d)));
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);

        let matching: Vec<&AggregateRecord> = inner
            .aggregates
            .values()
            .filter(|r| filter.provider.is_none_or(|p| r.key.provider == p))
            .filter(|r| {
                filter
                    .task_type
                    .as_deref()
                    .is_none_or(|t| r.key.task_type == t)
            })
            .filter(|r| since.is_none_or(|s| r.last_used >= s))
            .collect();

        let mut by_task: BTreeMap<&str, &AggregateRecord> = BTreeMap::new();
        for &record in &matching {
            let entry = by_task.entry(record.key.task_type.as_str()).or_insert(record);
            if record.avg_quality > entry.avg_quality
                || (record.avg_quality == entry.avg_quality && record.usage_count > entry.usage_count)
            {
                *entry = record;
            }
        }

        let best_models = by_task
            .into_iter()
            .map(|(task, best)| TaskInsight {
                task_type: task.to_string(),
                provider: best.key.provider,
                model: best.key.model.clone(),
                score: best.avg_quality,
                usage: best.usage_count,
                confidence: Confidence::from_quality(best.avg_quality),
                recommendation: format!(
                    "Use {} ({}) for {task} (score: {:.2})",
                    best.key.model, best.key.provider, best.avg_quality
                ),
            })
            .collect();

        LearningInsights {
            total_models: matching.len(),
            best_models,
        }
    }
}

fn summarize(count: u64, quality: f64, latency_ms: f64, tokens: u64) -> PerformanceSummary {
    let n = count as f64;
    PerformanceSummary {
        usage_count: count,
        avg_quality: quality / n,
        avg_latency_ms: latency_ms / n,
        avg_tokens: tokens as f64 / n,
    }
}
