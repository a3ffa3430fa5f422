//! Public types for the Conductor API.

mod generate;
mod learning;
mod model;
mod provider;
mod rollout;
mod version;

pub use generate::{
    CallOptions, Completion, DEFAULT_TASK_TYPE, GenerateOptions, GenerateResponse,
    system_prompt_for_task,
};
pub use learning::{
    AggregateRecord, Confidence, LearningInsights, LearningKey, ModelChoice, PerformanceSummary,
    TaskInsight, UsageSample,
};
pub use model::{ModelInfo, ModelRef};
pub use provider::{FreeTierLimits, ProviderDescriptor, ProviderKind};
pub use rollout::{
    IncrementOutcome, Rollout, RolloutMetrics, RolloutOptions, RolloutOutcome, RolloutStatus,
};
pub use version::{ModelVersion, VersionComparison, VersionEntryKind};
