//! API error types and the response envelope.
//!
//! Every JSON response, success or failure, uses the same envelope:
//!
//! ```text
//! {
//!   "success": false,
//!   "message": "too many requests",
//!   "error_code": "RATE_LIMITED",
//!   "timestamp": "2024-05-01T12:00:00Z",
//!   "request_id": "6f1c..."
//! }
//! ```

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use gantry_auth::AuthError;
use gantry_rpc::RpcError;

use crate::middleware::request_id;

/// API error type that implements `IntoResponse`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or invalid session credential.
    #[error("{0}")]
    Unauthorized(String),

    /// Too many requests from this client.
    #[error("too many requests, retry in {retry_after_secs}s")]
    RateLimited {
        /// Seconds until the window resets.
        retry_after_secs: u64,
    },

    /// Request body exceeds the configured cap.
    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge {
        /// The cap in bytes.
        limit: usize,
    },

    /// Cross-origin request from an origin not on the allow-list.
    #[error("origin not allowed")]
    ForbiddenOrigin,

    /// Input contained disallowed characters.
    #[error("invalid input: {0}")]
    InputInvalid(String),

    /// The requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid request body or parameters.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Initial setup was already performed.
    #[error("setup already completed")]
    SetupCompleted,

    /// Internal server error. The detail is logged, never returned.
    #[error("internal error: {0}")]
    Internal(String),

    /// A proxied gateway call failed.
    #[error(transparent)]
    Gateway(#[from] RpcError),
}

impl ApiError {
    /// Get the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::ForbiddenOrigin => StatusCode::FORBIDDEN,
            Self::InputInvalid(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::SetupCompleted => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Gateway(err) => match err {
                RpcError::Unreachable(_) | RpcError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
                RpcError::Timeout => StatusCode::GATEWAY_TIMEOUT,
                RpcError::AuthRejected(_) | RpcError::Protocol(_) | RpcError::Remote { .. } => {
                    StatusCode::BAD_GATEWAY
                }
            },
        }
    }

    /// Get the wire error code for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "AUTH_UNAUTHORIZED",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::BodyTooLarge { .. } => "BODY_TOO_LARGE",
            Self::ForbiddenOrigin => "FORBIDDEN_ORIGIN",
            Self::InputInvalid(_) => "INPUT_INVALID",
            Self::NotFound(_) => "NOT_FOUND",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::SetupCompleted => "SETUP_COMPLETED",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Gateway(err) => match err {
                RpcError::Unreachable(_) | RpcError::Cancelled => "GATEWAY_UNREACHABLE",
                RpcError::Timeout => "GATEWAY_TIMEOUT",
                RpcError::AuthRejected(_) => "GATEWAY_AUTH_REJECTED",
                RpcError::Protocol(_) => "GATEWAY_PROTOCOL_ERROR",
                RpcError::Remote { .. } => "GATEWAY_ERROR",
            },
        }
    }

    /// Message safe to show the client.
    pub(crate) fn public_message(&self) -> String {
        match self {
            Self::Internal(_) => "internal server error".to_string(),
            Self::Gateway(RpcError::Remote { message, .. }) => message.clone(),
            Self::Gateway(RpcError::Protocol(_)) => "gateway sent an invalid response".to_string(),
            other => other.to_string(),
        }
    }
}

/// The response envelope.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    /// Whether the request succeeded.
    pub success: bool,
    /// Response payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Human-readable message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Machine-readable error code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
    /// When the response was produced.
    pub timestamp: DateTime<Utc>,
    /// Correlation ID of the request.
    pub request_id: String,
}

impl<T> Envelope<T> {
    fn new(success: bool, data: Option<T>) -> Self {
        Self {
            success,
            data,
            message: None,
            error_code: None,
            timestamp: Utc::now(),
            request_id: request_id::current_or_generate().to_string(),
        }
    }
}

/// A successful JSON response wrapped in the envelope.
#[derive(Debug)]
pub struct ApiResponse<T> {
    status: StatusCode,
    data: T,
    message: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    /// `200 OK` with `data`.
    pub fn ok(data: T) -> Self {
        Self {
            status: StatusCode::OK,
            data,
            message: None,
        }
    }

    /// Attach a message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let mut body = Envelope::new(true, Some(self.data));
        body.message = self.message;
        (self.status, Json(body)).into_response()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if let Self::Internal(detail) = &self {
            tracing::error!(error = %detail, "Internal error");
        } else if let Self::Gateway(err) = &self {
            tracing::warn!(error = %err, kind = err.kind(), "Gateway call failed");
        }

        let mut body = Envelope::<()>::new(false, None);
        body.message = Some(self.public_message());
        body.error_code = Some(self.code());

        let mut response = (status, Json(body)).into_response();
        if let Self::RateLimited { retry_after_secs } = self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }
        response
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err.http_status_code() {
            401 => {
                let reason = match &err {
                    AuthError::MissingCredential => "authentication required",
                    AuthError::InvalidCredentials => "invalid username or password",
                    AuthError::TokenExpired => "session expired",
                    _ => "invalid session",
                };
                if err.is_retriable() {
                    Self::Unauthorized(format!("{reason}, log in again"))
                } else {
                    Self::Unauthorized(reason.to_string())
                }
            }
            409 => Self::SetupCompleted,
            _ => Self::Internal(format!("auth: {err}")),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

/// Fallback for unknown routes.
pub async fn not_found(uri: axum::http::Uri) -> ApiError {
    ApiError::NotFound(uri.path().to_string())
}
