//! Shared HTTP client construction and error classification.

use std::time::Duration;

use anyhow::{Context, Result};
use papertrail_core::error::CapabilityError;

/// Build a client with the given request timeout.
///
/// Connect timeout is capped at 10s, redirects are limited to 10 hops.
pub fn build_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(timeout_secs.min(10)))
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(concat!("papertrail/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .context("Failed to build HTTP client")
}

/// Map a transport-level error to a [`CapabilityError`].
pub fn classify_error(err: reqwest::Error) -> CapabilityError {
    if err.is_timeout() {
        CapabilityError::Timeout
    } else if err.is_connect() || err.is_request() {
        CapabilityError::Unavailable(err.to_string())
    } else if err.is_decode() || err.is_body() {
        CapabilityError::InvalidResponse(err.to_string())
    } else if let Some(status) = err.status() {
        status_error(status.as_u16(), err.to_string())
    } else {
        CapabilityError::Other(err.to_string())
    }
}

/// Map a non-success status and response body to a [`CapabilityError`].
pub fn status_error(status: u16, body: String) -> CapabilityError {
    if status == 429 {
        CapabilityError::RateLimited
    } else {
        CapabilityError::Status { status, body }
    }
}

/// Pass a successful response through; read the body of a failed one into the error.
pub async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, CapabilityError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status.as_u16(), truncate(&body, 512)))
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_429_is_rate_limited() {
        assert_eq!(status_error(429, String::new()), CapabilityError::RateLimited);
        assert!(status_error(502, "bad gateway".into()).is_transient());
        assert!(!status_error(404, "not found".into()).is_transient());
    }

    #[test]
    fn truncate_long_bodies() {
        assert_eq!(truncate("abcdef", 3), "abc…");
        assert_eq!(truncate("ab", 3), "ab");
    }

    #[tokio::test]
    async fn connection_refused_is_transient() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = build_client(2).unwrap();
        let err = client
            .get(format!("http://127.0.0.1:{}/", port))
            .send()
            .await
            .unwrap_err();
        let classified = classify_error(err);
        assert!(classified.is_transient(), "got {classified:?}");
    }
}
