//! Health check endpoint.
//!
//! This module provides the public health check endpoint.

use serde::Serialize;

use crate::error::ApiResponse;

/// Health check payload.
#[derive(Debug, Serialize)]
pub struct HealthData {
    /// Service status.
    pub status: &'static str,
    /// Service version.
    pub version: &'static str,
}

/// Health check handler.
///
/// Served on `/health` and `/api/health`. Public; reports only that the
/// process is serving, not the gateway connection.
///
/// ```text
/// GET /health
///
/// Response: 200 OK
/// {
///   "success": true,
///   "data": { "status": "ok", "version": "0.1.0" },
///   "timestamp": "...",
///   "request_id": "..."
/// }
/// ```
pub async fn health() -> ApiResponse<HealthData> {
    ApiResponse::ok(HealthData {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    #[tokio::test]
    async fn health_returns_ok() {
        let response = health().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["status"], "ok");
    }
}
