//! Request decode layer, undoing the agent's wire framing in reverse
//! order: digest check over the raw body, gunzip, RSA block decryption.
//! Also gzips responses for clients that advertise support.

use std::sync::Arc;

use axum::body::{to_bytes, Body, Bytes};
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::wire;

use super::handlers::ApiError;
use super::AppState;

/// Requests the decode layer will buffer. Batches are capped at 100
/// records, so this is generous.
const BODY_LIMIT: usize = 4 * 1024 * 1024;

/// Verifies the keyed digest header against the raw transmitted body.
/// A mismatch (or a missing header) rejects the request before any
/// decoding or storage access. No-op when no key is configured.
pub async fn verify_digest(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(key) = &state.key else {
        return next.run(request).await;
    };

    let (parts, body) = request.into_parts();
    let bytes = match to_bytes(body, BODY_LIMIT).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return ApiError::new(StatusCode::BAD_REQUEST, "failed to read request body")
                .into_response()
        }
    };

    let header = parts
        .headers
        .get(wire::HASH_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !wire::verify_body(&bytes, key, header) {
        return ApiError::new(StatusCode::BAD_REQUEST, "body digest mismatch").into_response();
    }

    next.run(Request::from_parts(parts, Body::from(bytes))).await
}

/// Gunzips the body when `Content-Encoding: gzip` is present, then
/// decrypts full-key-size RSA blocks when a private key is configured.
pub async fn decode_request(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();
    let bytes = match to_bytes(body, BODY_LIMIT).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return ApiError::new(StatusCode::BAD_REQUEST, "failed to read request body")
                .into_response()
        }
    };
    let mut data = bytes.to_vec();

    let gzipped = parts
        .headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("gzip"));
    if gzipped {
        data = match wire::gzip_decompress(&data) {
            Ok(data) => data,
            Err(_) => {
                return ApiError::new(StatusCode::BAD_REQUEST, "invalid gzip body").into_response()
            }
        };
        parts.headers.remove(header::CONTENT_ENCODING);
    }

    if let Some(private_key) = &state.private_key {
        if !data.is_empty() {
            data = match wire::decrypt_blocks(private_key, &data) {
                Ok(data) => data,
                Err(err) => {
                    tracing::warn!(error = %err, "rejecting undecryptable body");
                    return ApiError::new(StatusCode::BAD_REQUEST, "decryption failed")
                        .into_response();
                }
            };
        }
    }

    parts.headers.remove(header::CONTENT_LENGTH);
    next.run(Request::from_parts(parts, Body::from(data))).await
}

/// Gzips the response body when the client sent `Accept-Encoding: gzip`.
pub async fn compress_response(request: Request, next: Next) -> Response {
    let accepts_gzip = request
        .headers()
        .get(header::ACCEPT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("gzip"));

    let response = next.run(request).await;
    if !accepts_gzip || response.headers().contains_key(header::CONTENT_ENCODING) {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };

    match wire::gzip_compress(&bytes) {
        Ok(compressed) => {
            parts.headers.remove(header::CONTENT_LENGTH);
            parts.headers.insert(
                header::CONTENT_ENCODING,
                header::HeaderValue::from_static("gzip"),
            );
            Response::from_parts(parts, Body::from(compressed))
        }
        Err(_) => Response::from_parts(parts, Body::from(Bytes::copy_from_slice(&bytes))),
    }
}
