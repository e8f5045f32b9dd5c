use axum::response::Response;
use futures_util::StreamExt;

use crate::error::BridgeError;
use crate::stream::{transcode_stream, TranscodeRequest};

use super::ensure_success;

#[inline]
pub(crate) fn sse_ok_response(body: axum::body::Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = http::StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(
        http::header::CACHE_CONTROL,
        http::HeaderValue::from_static("no-cache"),
    );
    headers.insert(
        http::header::CONNECTION,
        http::HeaderValue::from_static("keep-alive"),
    );
    response
}

/// Stream an upstream NDJSON response to the client as chat-completion SSE.
///
/// # Errors
///
/// Returns [`BridgeError::Upstream`] when upstream answered with a non-2xx
/// status; nothing has been streamed in that case.
pub async fn stream_chat_completion(
    upstream: reqwest::Response,
    request: TranscodeRequest,
) -> Result<Response, BridgeError> {
    let upstream = ensure_success(upstream).await?;
    let output_stream = transcode_stream(upstream.bytes_stream(), request);
    let body = axum::body::Body::from_stream(
        output_stream.map(Ok::<bytes::Bytes, std::convert::Infallible>),
    );
    Ok(sse_ok_response(body))
}
