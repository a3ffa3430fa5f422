//! Offline A/B comparison of two model versions.
//!
//! Each prompt runs against both versions concurrently through
//! [`Dispatcher::generate_pinned`], so test traffic passes the quota gate
//! but never touches rollouts, fallback or the learning store. A prompt that
//! fails scores 0 for that version.
//!
//! Reports are cached for an hour per (provider, model, version A,
//! version B) so repeated admin queries do not spend free-tier quota.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::Result;
use crate::dispatcher::Dispatcher;
use crate::telemetry;
use crate::types::{GenerateOptions, ProviderKind};
use crate::versions::VersionStore;

/// Prompts used when the caller supplies none.
pub const DEFAULT_TEST_PROMPTS: [&str; 5] = [
    "Create a viral TikTok caption about AI",
    "Write an engaging LinkedIn post about productivity",
    "Generate 5 hashtags for a tech startup",
    "Create a short Instagram caption for a product launch",
    "Write a Twitter thread about innovation",
];

const CACHE_TTL: Duration = Duration::from_secs(3600);
const CACHE_CAPACITY: u64 = 1_000;
const TEST_MAX_TOKENS: u32 = 200;
const UPGRADE_MIN_DELTA: f64 = 0.1;
const KEEP_MAX_DELTA: f64 = -0.05;

/// What the comparison suggests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recommendation {
    Upgrade,
    Keep,
    Neutral,
}

/// One prompt against one version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptResult {
    pub prompt: String,
    pub success: bool,
    pub quality_score: f64,
    pub response_time_ms: f64,
    pub tokens: u64,
    pub error: Option<String>,
}

/// Aggregate results for one version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionResults {
    pub version: String,
    pub tests: Vec<PromptResult>,
    pub avg_quality: f64,
    pub avg_response_time_ms: f64,
    pub avg_tokens: f64,
    /// Prompts where this version scored strictly higher.
    pub wins: usize,
}

/// Outcome of [`VersionTester::compare`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbTestReport {
    pub provider: ProviderKind,
    pub model: String,
    pub version_a: VersionResults,
    pub version_b: VersionResults,
    /// `b - a` average quality.
    pub quality_delta: f64,
    /// `b - a` average response time in milliseconds.
    pub response_time_delta_ms: f64,
    pub recommendation: Recommendation,
    pub reason: String,
}

/// Gate returned by [`VersionTester::validate_before_upgrade`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpgradeValidation {
    pub valid: bool,
    pub reason: String,
    pub report: Option<AbTestReport>,
}

type CacheKey = (ProviderKind, String, String, String);

/// Runs A/B comparisons through a dispatcher.
pub struct VersionTester {
    dispatcher: Arc<Dispatcher>,
    versions: Arc<VersionStore>,
    cache: Cache<CacheKey, Arc<AbTestReport>>,
}

impl VersionTester {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self::with_ttl(dispatcher, CACHE_TTL)
    }

    /// Create a tester whose reports expire after `ttl`.
    pub fn with_ttl(dispatcher: Arc<Dispatcher>, ttl: Duration) -> Self {
        let versions = dispatcher.versions().clone();
        let cache = Cache::builder()
            .max_capacity(CACHE_CAPACITY)
            .time_to_live(ttl)
            .build();
        Self {
            dispatcher,
            versions,
            cache,
        }
    }

    /// Compare `version_b` against `version_a`.
    ///
    /// An empty `prompts` slice uses [`DEFAULT_TEST_PROMPTS`].
    #[instrument(skip(self, provider, prompts), fields(provider = %provider))]
    pub async fn compare(
        &self,
        provider: ProviderKind,
        model: &str,
        version_a: &str,
        version_b: &str,
        prompts: &[String],
    ) -> Result<AbTestReport> {
        self.dispatcher.registry().get(provider)?;
        let key = (
            provider,
            model.to_string(),
            version_a.to_string(),
            version_b.to_string(),
        );
        if let Some(cached) = self.cache.get(&key).await {
            metrics::counter!(telemetry::ABTEST_CACHE_HITS_TOTAL).increment(1);
            return Ok((*cached).clone());
        }
        metrics::counter!(telemetry::ABTEST_CACHE_MISSES_TOTAL).increment(1);

        let prompts: Vec<&str> = if prompts.is_empty() {
            DEFAULT_TEST_PROMPTS.to_vec()
        } else {
            prompts.iter().map(String::as_str).collect()
        };

        let mut a_tests = Vec::with_capacity(prompts.len());
        let mut b_tests = Vec::with_capacity(prompts.len());
        for prompt in &prompts {
            let (a, b) = join(
                self.run_one(provider, model, version_a, prompt),
                self.run_one(provider, model, version_b, prompt),
            )
            .await;
            a_tests.push(a);
            b_tests.push(b);
        }

        let (a_wins, b_wins) = a_tests
            .iter()
            .zip(&b_tests)
            .fold((0, 0), |(a, b), (x, y)| {
                if x.quality_score > y.quality_score {
                    (a + 1, b)
                } else if y.quality_score > x.quality_score {
                    (a, b + 1)
                } else {
                    (a, b)
                }
            });
        let version_a = summarize(version_a, a_tests, a_wins);
        let version_b = summarize(version_b, b_tests, b_wins);

        let quality_delta = version_b.avg_quality - version_a.avg_quality;
        let (recommendation, reason) = recommend(&version_a, &version_b, quality_delta);

        let report = AbTestReport {
            provider,
            model: model.to_string(),
            response_time_delta_ms: version_b.avg_response_time_ms - version_a.avg_response_time_ms,
            quality_delta,
            version_a,
            version_b,
            recommendation,
            reason,
        };
        info!(
            model,
            version_a = %report.version_a.version,
            version_b = %report.version_b.version,
            quality_delta,
            recommendation = ?recommendation,
            "A/B test completed"
        );
        self.cache.insert(key, Arc::new(report.clone())).await;
        Ok(report)
    }

    /// Compare a candidate against the current version and decide whether
    /// the upgrade may proceed.
    ///
    /// Models with no current version are always valid. Otherwise the
    /// upgrade is blocked only when the candidate is measurably worse.
    pub async fn validate_before_upgrade(
        &self,
        provider: ProviderKind,
        model: &str,
        new_version: &str,
    ) -> Result<UpgradeValidation> {
        let Some(current) = self.versions.current(provider, model) else {
            return Ok(UpgradeValidation {
                valid: true,
                reason: "no current version to compare against".into(),
                report: None,
            });
        };

        let report = self
            .compare(provider, model, &current.version, new_version, &[])
            .await?;
        let valid = report.quality_delta > KEEP_MAX_DELTA;
        let reason = if valid {
            format!(
                "version {new_version} passed validation (quality delta {:+.3})",
                report.quality_delta
            )
        } else {
            format!(
                "version {new_version} is worse than {} (quality delta {:+.3})",
                current.version, report.quality_delta
            )
        };
        Ok(UpgradeValidation {
            valid,
            reason,
            report: Some(report),
        })
    }

    /// Drop every cached report.
    pub fn clear_cache(&self) {
        self.cache.invalidate_all();
    }

    async fn run_one(
        &self,
        provider: ProviderKind,
        model: &str,
        version: &str,
        prompt: &str,
    ) -> PromptResult {
        let options = GenerateOptions::new().max_tokens(TEST_MAX_TOKENS);
        let started = Instant::now();
        match self
            .dispatcher
            .generate_pinned(prompt, provider, model, Some(version), &options)
            .await
        {
            Ok(r) => PromptResult {
                prompt: prompt.to_string(),
                success: true,
                quality_score: r.quality_score,
                response_time_ms: r.response_time.as_secs_f64() * 1000.0,
                tokens: r.tokens,
                error: None,
            },
            Err(e) => {
                warn!(model, version, error = %e, "version test failed");
                PromptResult {
                    prompt: prompt.to_string(),
                    success: false,
                    quality_score: 0.0,
                    response_time_ms: started.elapsed().as_secs_f64() * 1000.0,
                    tokens: 0,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

fn summarize(version: &str, tests: Vec<PromptResult>, wins: usize) -> VersionResults {
    let n = tests.len().max(1) as f64;
    VersionResults {
        version: version.to_string(),
        avg_quality: tests.iter().map(|t| t.quality_score).sum::<f64>() / n,
        avg_response_time_ms: tests.iter().map(|t| t.response_time_ms).sum::<f64>() / n,
        avg_tokens: tests.iter().map(|t| t.tokens as f64).sum::<f64>() / n,
        tests,
        wins,
    }
}

fn recommend(a: &VersionResults, b: &VersionResults, delta: f64) -> (Recommendation, String) {
    if delta >= UPGRADE_MIN_DELTA && b.wins > a.wins {
        (
            Recommendation::Upgrade,
            format!(
                "version {} shows {:.1}% better quality",
                b.version,
                delta * 100.0
            ),
        )
    } else if delta <= KEEP_MAX_DELTA {
        (
            Recommendation::Keep,
            format!("version {} performs better", a.version),
        )
    } else {
        (
            Recommendation::Neutral,
            "versions perform similarly".to_string(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn results(version: &str, avg: f64, wins: usize) -> VersionResults {
        VersionResults {
            version: version.into(),
            tests: Vec::new(),
            avg_quality: avg,
            avg_response_time_ms: 0.0,
            avg_tokens: 0.0,
            wins,
        }
    }

    #[test]
    fn upgrade_needs_delta_and_more_wins() {
        let a = results("1", 0.5, 1);
        let b = results("2", 0.7, 3);
        assert_eq!(recommend(&a, &b, 0.2).0, Recommendation::Upgrade);

        let b_fewer_wins = results("2", 0.7, 1);
        assert_eq!(recommend(&a, &b_fewer_wins, 0.2).0, Recommendation::Neutral);
    }

    #[test]
    fn keep_at_small_regression() {
        let a = results("1", 0.7, 3);
        let b = results("2", 0.6, 0);
        assert_eq!(recommend(&a, &b, -0.05).0, Recommendation::Keep);
        assert_eq!(recommend(&a, &b, -0.04).0, Recommendation::Neutral);
    }
}
