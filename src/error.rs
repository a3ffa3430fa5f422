//! Conductor error types

use std::time::Duration;

use crate::types::ProviderKind;

/// Conductor error types
#[derive(Debug, thiserror::Error)]
pub enum ConductorError {
    // Caller errors
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    // Quota errors
    /// Local free-tier gate rejected the call before it reached the provider.
    #[error("rate limit exceeded for {provider}: {reason} (retry after {}s)", retry_after.as_secs())]
    RateLimitExceeded {
        provider: ProviderKind,
        reason: String,
        retry_after: Duration,
    },

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    // Provider/network errors
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The provider itself answered 429.
    #[error("provider rate limited, retry after {retry_after:?}")]
    ProviderRateLimited { retry_after: Option<Duration> },

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("empty response from model")]
    EmptyResponse,

    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),

    // Data errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ConductorError {
    /// Whether a transport retry may succeed.
    ///
    /// Network failures, timeouts, provider 429s and 5xx responses are
    /// transient. Auth, validation and local quota rejections are not.
    pub fn is_transient(&self) -> bool {
        match self {
            ConductorError::Http(_)
            | ConductorError::Timeout(_)
            | ConductorError::ProviderRateLimited { .. } => true,
            ConductorError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Retry hint carried by rate-limit errors.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ConductorError::RateLimitExceeded { retry_after, .. } => Some(*retry_after),
            ConductorError::ProviderRateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Local gate rejection (the only error the dispatcher answers with a
    /// fallback before touching the network).
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, ConductorError::RateLimitExceeded { .. })
    }

    /// Map a non-success HTTP status to an error.
    pub(crate) fn from_status(status: u16, message: String, retry_after: Option<Duration>) -> Self {
        match status {
            401 | 403 => ConductorError::AuthenticationFailed,
            429 => ConductorError::ProviderRateLimited { retry_after },
            _ => ConductorError::Api { status, message },
        }
    }
}

impl From<reqwest::Error> for ConductorError {
    fn from(err: reqwest::Error) -> Self {
        ConductorError::Http(err.to_string())
    }
}

/// Result type alias for Conductor operations
pub type Result<T> = std::result::Result<T, ConductorError>;
