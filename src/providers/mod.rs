//! Provider transports.
//!
//! One [`ProviderClient`] per [`ProviderKind`]. [`build_clients`] wires the
//! built-in transports from a registry and a set of API keys, each wrapped
//! in a [`RetryingProviderClient`].

pub(crate) mod http;
pub mod huggingface;
pub mod openai_compat;
pub mod replicate;
pub mod retry;
pub mod traits;

use std::sync::Arc;
use std::time::Duration;

pub use huggingface::HuggingFaceClient;
pub use openai_compat::ChatCompletionsClient;
pub use replicate::ReplicateClient;
pub use retry::{RetryConfig, RetryingProviderClient};
pub use traits::ProviderClient;

use crate::Result;
use crate::config::ApiKeys;
use crate::registry::ProviderRegistry;
use crate::types::ProviderKind;

/// Application name sent to OpenRouter for attribution.
const OPENROUTER_TITLE: &str = "conductor";

/// Build a retrying transport for every provider in `registry`.
pub fn build_clients(
    registry: &ProviderRegistry,
    keys: &ApiKeys,
    timeout: Duration,
    retry: &RetryConfig,
) -> Result<Vec<Arc<dyn ProviderClient>>> {
    registry
        .list()
        .into_iter()
        .map(|descriptor| {
            let key = keys.get(descriptor.id).map(str::to_owned);
            let base = descriptor.base_url.clone();
            let client: Arc<dyn ProviderClient> = match descriptor.id {
                ProviderKind::OpenRouter => Arc::new(
                    ChatCompletionsClient::openrouter(base, key, timeout)?
                        .with_header("X-Title", OPENROUTER_TITLE),
                ),
                ProviderKind::Cerebras => {
                    Arc::new(ChatCompletionsClient::cerebras(base, key, timeout)?)
                }
                ProviderKind::HuggingFace => Arc::new(HuggingFaceClient::new(base, key, timeout)?),
                ProviderKind::Replicate => Arc::new(ReplicateClient::new(base, key, timeout)?),
            };
            Ok(Arc::new(RetryingProviderClient::new(client, retry.clone())) as Arc<dyn ProviderClient>)
        })
        .collect()
}
