//! Panic recovery.
//!
//! Used with `tower_http::catch_panic::CatchPanicLayer::custom` as the
//! outermost stage. The panic payload is logged; the client only sees a
//! generic `INTERNAL_ERROR` envelope.
//!
//! The handler only receives the panic payload, and the request ID scope has
//! already unwound, so the envelope's `request_id` is freshly generated and
//! does not match the request's `X-Request-ID`. The error log line is emitted
//! outside the request span as well.

use std::any::Any;

use axum::response::{IntoResponse, Response};

use crate::error::ApiError;

/// Convert a caught panic into an error response.
#[allow(clippy::needless_pass_by_value)]
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic payload");

    tracing::error!(panic = %detail, "Request handler panicked");
    ApiError::Internal(format!("panic: {detail}")).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn panic_becomes_generic_error() {
        let response = panic_response(Box::new("secret detail"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("INTERNAL_ERROR"));
        assert!(!text.contains("secret detail"));
    }
}
