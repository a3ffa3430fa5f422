//! Shared HTTP plumbing for provider transports.

use std::time::Duration;

use reqwest::{Client, Response};

use crate::{ConductorError, Result};

/// Build a `reqwest` client with a per-request timeout.
pub(crate) fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ConductorError::Configuration(format!("failed to build HTTP client: {e}")))
}

/// Pass successful responses through; map everything else to an error.
///
/// 429 responses carry the `retry-after` header (seconds) when present.
pub(crate) async fn check_status(response: Response, provider: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = response.text().await.unwrap_or_default();
    let message = if body.is_empty() {
        format!("{provider} API error: {status}")
    } else {
        format!("{provider} API error: {status}: {}", truncate(&body, 200))
    };
    Err(ConductorError::from_status(status.as_u16(), message, retry_after))
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
