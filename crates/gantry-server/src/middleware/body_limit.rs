//! Request body cap.
//!
//! A declared `Content-Length` over the cap is refused before any byte is
//! read. Every other body is buffered up to the cap and refused as soon as it
//! exceeds it, whether it arrives chunked, as HTTP/2 data frames or with no
//! length at all. Handlers downstream always see a body of known size.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;

use crate::error::ApiError;
use crate::state::AppState;

/// Body size stage.
pub async fn limit_body(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let limit = state.config.max_body_bytes;

    let declared = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    if let Some(length) = declared.filter(|&length| length > limit as u64) {
        tracing::warn!(length, limit, "Rejected oversized request body");
        return Err(ApiError::BodyTooLarge { limit });
    }

    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, limit).await.map_err(|e| {
        tracing::warn!(error = %e, limit, "Request body not read within limit");
        ApiError::BodyTooLarge { limit }
    })?;

    Ok(next.run(Request::from_parts(parts, Body::from(bytes))).await)
}
