//! Shared HTTP plumbing for the provider adapters.

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};

use super::error::ProviderError;

/// Builds the HTTP client used by every provider adapter.
pub(crate) fn build_client(timeout: Duration) -> Client {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Maps a non-success HTTP status onto the provider error taxonomy.
///
/// Successful responses are passed through untouched.
pub(crate) async fn check_status(response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_ms = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(|secs| secs * 1000)
            .unwrap_or(1000);
        return Err(ProviderError::RateLimited { retry_after_ms });
    }

    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "unknown error".to_string());

    Err(match status {
        StatusCode::BAD_REQUEST | StatusCode::PAYLOAD_TOO_LARGE | StatusCode::UNPROCESSABLE_ENTITY => {
            ProviderError::Malformed(message)
        }
        s if s.is_server_error() => ProviderError::Server {
            status: s.as_u16(),
            message,
        },
        s => ProviderError::Unavailable(format!("status {}: {message}", s.as_u16())),
    })
}

/// Maps reqwest's own timeout onto [`ProviderError::Timeout`].
pub(crate) fn transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Network(err)
    }
}
