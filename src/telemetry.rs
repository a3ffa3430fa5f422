//! Telemetry metric name constants.
//!
//! Centralised metric names for conductor operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `conductor_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `provider`: provider id (e.g. "openrouter", "cerebras")
//! - `status`: outcome: "ok" or "error"
//! - `cohort`: rollout assignment: "new" or "current"

/// Total provider calls made by the dispatcher.
///
/// Labels: `provider`, `status` ("ok" | "error").
pub const REQUESTS_TOTAL: &str = "conductor_requests_total";

/// Provider call duration in seconds.
///
/// Labels: `provider`.
pub const REQUEST_DURATION_SECONDS: &str = "conductor_request_duration_seconds";

/// Requests rerouted to the fallback provider.
///
/// Labels: `from` (original provider), `to` (fallback provider).
pub const FALLBACKS_TOTAL: &str = "conductor_fallbacks_total";

/// Requests rejected by the local free-tier gate.
///
/// Labels: `provider`.
pub const RATE_LIMITED_TOTAL: &str = "conductor_rate_limited_total";

/// Transport retry attempts (not counting the initial request).
///
/// Labels: `provider`.
pub const RETRIES_TOTAL: &str = "conductor_retries_total";

/// Total tokens consumed.
///
/// Labels: `provider`.
pub const TOKENS_TOTAL: &str = "conductor_tokens_total";

/// Rollout bucketing decisions.
///
/// Labels: `cohort` ("new" | "current").
pub const ROLLOUT_ASSIGNMENTS_TOTAL: &str = "conductor_rollout_assignments_total";

/// A/B comparison cache hits.
pub const ABTEST_CACHE_HITS_TOTAL: &str = "conductor_abtest_cache_hits_total";

/// A/B comparison cache misses.
pub const ABTEST_CACHE_MISSES_TOTAL: &str = "conductor_abtest_cache_misses_total";
