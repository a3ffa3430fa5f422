//! Conductor - free-tier AI model orchestration
//!
//! This crate dispatches text-generation requests across free-tier model
//! providers. It picks a model from what it has learned about past quality,
//! enforces each provider's daily and per-minute quotas, falls back once to a
//! designated provider when the first attempt fails, and manages model
//! versions through A/B tests, gradual rollouts and rollbacks.
//!
//! ```text
//!   generate(prompt, options)
//!        │
//!        ▼
//!   select (explicit ▸ learned best ▸ registry default)
//!        │
//!        ▼
//!   rollout bucket? ──► version pinned for this user
//!        │
//!        ▼
//!   RateLimiter::acquire ──► ProviderClient::generate ──► quality score
//!        │ fails                                               │
//!        ▼                                                     ▼
//!   fallback provider (once)                          LearningStore, rollout metrics
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use conductor::{Dispatcher, GenerateOptions};
//!
//! #[tokio::main]
//! async fn main() -> conductor::Result<()> {
//!     // Keys are read from OPENROUTER_API_KEY, HUGGINGFACE_API_KEY, ...
//!     let dispatcher = Dispatcher::builder()
//!         .retry(conductor::RetryConfig::new().max_attempts(2))
//!         .build()?;
//!
//!     let response = dispatcher
//!         .generate(
//!             "Write a short caption for a product launch",
//!             &GenerateOptions::new().task_type("caption-generation"),
//!         )
//!         .await?;
//!
//!     println!("{} via {}: {}", response.model, response.provider, response.content);
//!     Ok(())
//! }
//! ```

pub mod abtest;
pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod keys;
pub mod learning;
pub mod providers;
pub mod ratelimit;
pub mod registry;
pub mod rollout;
pub mod scoring;
pub mod telemetry;
pub mod types;
pub mod versions;

// Re-export main types at crate root
pub use abtest::{AbTestReport, Recommendation, VersionTester};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ApiKeys, Config};
pub use dispatcher::{Dispatcher, DispatcherBuilder, ProviderOverview};
pub use error::{ConductorError, Result};
pub use keys::{KeyStatus, KeyValidation, KeyValidator};
pub use learning::{BestModelQuery, InsightsFilter, LearningStore};
pub use providers::{ProviderClient, RetryConfig};
pub use ratelimit::{RateLimitStatus, RateLimiter};
pub use registry::ProviderRegistry;
pub use rollout::RolloutManager;
pub use versions::{
    RollbackCheck, RollbackCriteria, RollbackManager, UpgradeOptions, UpgradeOutcome, Upgrader,
    VersionStore,
};

// Re-export all types
pub use types::{
    AggregateRecord, CallOptions, Completion, Confidence, FreeTierLimits, GenerateOptions,
    GenerateResponse, IncrementOutcome, LearningInsights, ModelChoice, ModelInfo, ModelRef,
    ModelVersion, PerformanceSummary, ProviderDescriptor, ProviderKind, Rollout, RolloutOptions,
    RolloutOutcome, RolloutStatus, UsageSample, VersionComparison, VersionEntryKind,
};
