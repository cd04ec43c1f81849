//! Shared HTTP plumbing for remote providers.

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;

use super::policy::parse_retry_after;
use super::ProviderError;

/// Client-level ceiling; per-call timeouts are enforced by the gateway.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(300);

pub(super) fn build_client() -> Result<Client, ProviderError> {
    Client::builder()
        .timeout(CLIENT_TIMEOUT)
        .user_agent(concat!("recipe-adjust/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ProviderError::Unavailable(format!("failed to create HTTP client: {}", e)))
}

/// Map a transport error onto the provider error taxonomy.
pub(super) fn send_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Unavailable(e.to_string())
    }
}

/// Check the status and decode a JSON body.
pub(super) async fn read_json<T: DeserializeOwned>(resp: Response) -> Result<T, ProviderError> {
    let status = resp.status();
    if status.is_success() {
        return resp
            .json()
            .await
            .map_err(|e| ProviderError::MalformedOutput(format!("invalid response body: {}", e)));
    }

    let retry_after = resp
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = resp.text().await.unwrap_or_default();
    Err(status_error(status, retry_after.as_deref(), &body))
}

fn status_error(status: StatusCode, retry_after: Option<&str>, body: &str) -> ProviderError {
    match status.as_u16() {
        // 529 is Anthropic's "overloaded"
        429 | 529 => ProviderError::RateLimited {
            retry_after: parse_retry_after(retry_after),
        },
        408 | 504 => ProviderError::Timeout,
        _ => ProviderError::Unavailable(format!("HTTP {}: {}", status, truncate(body, 200))),
    }
}

fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_error(StatusCode::TOO_MANY_REQUESTS, Some("7"), ""),
            ProviderError::RateLimited {
                retry_after: Some(Duration::from_secs(7))
            }
        );
        assert_eq!(
            status_error(StatusCode::GATEWAY_TIMEOUT, None, ""),
            ProviderError::Timeout
        );
        assert!(matches!(
            status_error(StatusCode::INTERNAL_SERVER_ERROR, None, "boom"),
            ProviderError::Unavailable(msg) if msg.contains("boom")
        ));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("소금소금", 4), "소");
        assert_eq!(truncate("salt", 10), "salt");
    }
}
