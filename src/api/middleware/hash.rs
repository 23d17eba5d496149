//! Response signing middleware

use axum::{
    body::{Body, to_bytes},
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::api::ApiError;
use crate::signing::{HASH_HEADER, Signer};

/// Sign the response body into the `HashSHA256` header
///
/// Runs inside the compression layer, so the signature covers the
/// uncompressed body.
pub async fn sign_response(
    State(signer): State<Signer>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let response = next.run(request).await;
    let (mut parts, body) = response.into_parts();

    let bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return ApiError::Internal(format!("failed to buffer response: {}", e))
                .into_response();
        }
    };

    // Hex digits are always a valid header value
    if let Ok(value) = HeaderValue::from_str(&signer.sign(&bytes)) {
        parts.headers.insert(HASH_HEADER, value);
    }

    Response::from_parts(parts, Body::from(bytes))
}
