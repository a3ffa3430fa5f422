//! Provider transport trait.
//!
//! A [`ProviderClient`] turns one prompt into one [`Completion`] against one
//! remote API. It knows nothing about quotas, fallback, rollouts or
//! learning; the [`Dispatcher`](crate::dispatcher::Dispatcher) layers those
//! on top.
//!
//! Decorators such as [`RetryingProviderClient`](super::RetryingProviderClient)
//! wrap a client and implement the same trait.

use async_trait::async_trait;

use crate::Result;
use crate::types::{CallOptions, Completion, ModelRef, ProviderKind};

/// One remote text-generation API.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Which provider this client talks to.
    fn kind(&self) -> ProviderKind;

    /// Generate a completion.
    ///
    /// `model.wire_id()` is the identifier sent to the provider. Errors are
    /// classified by [`ConductorError::is_transient`](crate::ConductorError::is_transient);
    /// the dispatcher treats every error as a failed call.
    async fn generate(
        &self,
        prompt: &str,
        model: &ModelRef,
        options: &CallOptions,
    ) -> Result<Completion>;
}
