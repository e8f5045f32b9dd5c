use axum::response::Response;

use crate::aggregate::collect_completion;
use crate::error::BridgeError;
use crate::stream::TranscodeRequest;

use super::ensure_success;

#[inline]
fn ok_json_response(body_bytes: bytes::Bytes) -> Response {
    let mut response = Response::new(axum::body::Body::from(body_bytes));
    *response.status_mut() = http::StatusCode::OK;
    response.headers_mut().insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );
    response
}

/// Collect an upstream NDJSON response into one chat completion JSON body.
///
/// # Errors
///
/// Returns [`BridgeError::Upstream`] for a non-2xx status or an upstream error
/// record, and [`BridgeError::Transport`] when the body cannot be read.
pub async fn collect_chat_completion(
    upstream: reqwest::Response,
    request: TranscodeRequest,
) -> Result<Response, BridgeError> {
    let upstream = ensure_success(upstream).await?;
    let completion = collect_completion(upstream.bytes_stream(), request).await?;
    let body = serde_json::to_vec(&completion)
        .map_err(|e| BridgeError::Internal(format!("Failed to encode completion: {e}")))?;
    Ok(ok_json_response(bytes::Bytes::from(body)))
}
