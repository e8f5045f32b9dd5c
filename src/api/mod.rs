//! axum responses built around an upstream `reqwest::Response`.

pub mod non_streaming;
pub mod streaming;

pub use non_streaming::collect_chat_completion;
pub use streaming::stream_chat_completion;

use http::HeaderMap;

use crate::error::{sanitize_upstream_error, BridgeError};

/// Public `scheme://host` of the inbound request.
///
/// `X-Forwarded-Proto` and `X-Forwarded-Host` are honored only when
/// `trust_forwarded` is set; otherwise the scheme is `http` and the host comes
/// from `Host`.
#[must_use]
pub fn request_origin(headers: &HeaderMap, trust_forwarded: bool) -> Option<String> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    let forwarded_host = trust_forwarded.then(|| header("x-forwarded-host")).flatten();
    let host = forwarded_host.or_else(|| header(http::header::HOST.as_str()))?;
    let scheme = trust_forwarded
        .then(|| header("x-forwarded-proto"))
        .flatten()
        .filter(|proto| proto.eq_ignore_ascii_case("https") || proto.eq_ignore_ascii_case("http"))
        .unwrap_or("http");
    Some(format!("{}://{host}", scheme.to_ascii_lowercase()))
}

/// Turn a non-2xx upstream response into [`BridgeError::Upstream`].
async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, BridgeError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body_bytes = response
        .bytes()
        .await
        .map_err(|e| BridgeError::Transport(format!("Failed to read error body: {e}")))?;
    Err(BridgeError::Upstream {
        status: status.as_u16(),
        message: sanitize_upstream_error(&body_bytes),
    })
}
