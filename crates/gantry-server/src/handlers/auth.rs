//! Login, initial setup, logout and session introspection.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gantry_auth::{AuditEvent, AuditResult, AuthError, IssuedSession, Principal};

use crate::auth::{clear_session_cookie, session_cookie, session_token, AuthUser, ClientIp};
use crate::error::{ApiError, ApiResponse};
use crate::notify::{publish_internal, InternalEvent};
use crate::state::AppState;

const MAX_USERNAME_LEN: usize = 64;
const MIN_PASSWORD_LEN: usize = 8;

/// Login or setup request body.
#[derive(Debug, Deserialize)]
pub struct Credentials {
    /// Username.
    pub username: String,
    /// Password.
    pub password: String,
}

/// Returned on login and setup.
#[derive(Debug, Serialize)]
pub struct SessionData {
    /// Username.
    pub username: String,
    /// Hex user ID.
    pub user_id: String,
    /// Session token, also set as the session cookie.
    pub token: String,
    /// Session expiry.
    pub expires_at: DateTime<Utc>,
}

/// Returned by `GET /api/auth/status`.
#[derive(Debug, Serialize)]
pub struct AuthStatus {
    /// No administrator exists yet.
    pub setup_required: bool,
    /// The request carried a valid session.
    pub authenticated: bool,
    /// Username of that session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// Returned by `GET /api/auth/me`.
#[derive(Debug, Serialize)]
pub struct Me {
    /// Username.
    pub username: String,
    /// Hex user ID.
    pub user_id: String,
    /// Session expiry.
    pub expires_at: DateTime<Utc>,
}

fn session_response(principal: &Principal, issued: IssuedSession, message: &str) -> Response {
    let max_age = (issued.expires_at - Utc::now()).num_seconds().max(0);
    let cookie = session_cookie(&issued.token, max_age);

    let mut response = ApiResponse::ok(SessionData {
        username: principal.username.clone(),
        user_id: principal.user_id.to_hex(),
        token: issued.token,
        expires_at: issued.expires_at,
    })
    .with_message(message)
    .into_response();

    if let Ok(value) = HeaderValue::from_str(&cookie) {
        response.headers_mut().insert(header::SET_COOKIE, value);
    }
    response
}

fn validate_new_credentials(credentials: &Credentials) -> Result<(), ApiError> {
    let username = credentials.username.as_str();
    if username.is_empty() || username.len() > MAX_USERNAME_LEN {
        return Err(ApiError::BadRequest(format!(
            "username must be 1 to {MAX_USERNAME_LEN} characters"
        )));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(ApiError::BadRequest(
            "username may only contain letters, digits, '.', '_' and '-'".to_string(),
        ));
    }
    if credentials.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::BadRequest(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// `POST /api/auth/login`
///
/// # Errors
///
/// `AUTH_UNAUTHORIZED` if the credentials do not match.
pub async fn login(
    State(state): State<AppState>,
    ip: ClientIp,
    body: Result<Json<Credentials>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(credentials) = body?;
    let audit = |result, detail: &str| {
        state.audit.record(
            AuditEvent::new("login", result, detail)
                .with_ip(ip.label())
                .with_username(credentials.username.as_str()),
        );
    };

    let principal = match state
        .accounts
        .verify(&credentials.username, &credentials.password)
        .await
    {
        Ok(principal) => principal,
        Err(err) => {
            let result = match err {
                AuthError::InvalidCredentials => AuditResult::Denied,
                _ => AuditResult::Failure,
            };
            audit(result, &err.to_string());
            return Err(err.into());
        }
    };

    let issued = state.signer.issue(&principal.username)?;
    audit(AuditResult::Success, "session issued");
    publish_internal(
        &state.hub,
        &InternalEvent::Login {
            username: principal.username.clone(),
        },
    );
    tracing::info!(username = %principal.username, "User logged in");

    Ok(session_response(&principal, issued, "logged in"))
}

/// `POST /api/auth/setup`
///
/// Creates the first administrator and logs them in. Only available while no
/// administrator exists.
///
/// # Errors
///
/// `SETUP_COMPLETED` once setup has been done; `BAD_REQUEST` for unusable
/// credentials.
pub async fn setup(
    State(state): State<AppState>,
    ip: ClientIp,
    body: Result<Json<Credentials>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(credentials) = body?;
    validate_new_credentials(&credentials)?;

    let audit = |result, detail: &str| {
        state.audit.record(
            AuditEvent::new("setup", result, detail)
                .with_ip(ip.label())
                .with_username(credentials.username.as_str()),
        );
    };

    if !state.accounts.needs_setup().await? {
        audit(AuditResult::Denied, "setup already completed");
        return Err(ApiError::SetupCompleted);
    }

    let principal = match state
        .accounts
        .create_initial_admin(&credentials.username, &credentials.password)
        .await
    {
        Ok(principal) => principal,
        Err(err) => {
            audit(AuditResult::Failure, &err.to_string());
            return Err(err.into());
        }
    };

    let issued = state.signer.issue(&principal.username)?;
    audit(AuditResult::Success, "administrator created");
    publish_internal(
        &state.hub,
        &InternalEvent::SetupCompleted {
            username: principal.username.clone(),
        },
    );
    tracing::info!(username = %principal.username, "Initial setup completed");

    Ok(session_response(&principal, issued, "administrator created"))
}

/// `GET /api/auth/status`
///
/// Public. Tells the UI whether to show setup or login.
///
/// # Errors
///
/// `INTERNAL_ERROR` if the account directory fails.
pub async fn status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<ApiResponse<AuthStatus>, ApiError> {
    let setup_required = state.accounts.needs_setup().await?;
    let session = match session_token(&headers) {
        Some(token) => state.validator.validate(&token).await.ok(),
        None => None,
    };

    Ok(ApiResponse::ok(AuthStatus {
        setup_required,
        authenticated: session.is_some(),
        username: session.map(|s| s.username),
    }))
}

/// `POST /api/auth/logout`
pub async fn logout(State(state): State<AppState>, ip: ClientIp, user: AuthUser) -> Response {
    state.audit.record(
        AuditEvent::new("logout", AuditResult::Success, "session cleared")
            .with_ip(ip.label())
            .with_username(user.username.as_str()),
    );
    publish_internal(
        &state.hub,
        &InternalEvent::Logout {
            username: user.username.clone(),
        },
    );

    let mut response = ApiResponse::ok(serde_json::json!({ "logged_out": true }))
        .with_message("logged out")
        .into_response();
    if let Ok(value) = HeaderValue::from_str(&clear_session_cookie()) {
        response.headers_mut().insert(header::SET_COOKIE, value);
    }
    response
}

/// `GET /api/auth/me`
pub async fn me(user: AuthUser) -> ApiResponse<Me> {
    ApiResponse::ok(Me {
        username: user.username,
        user_id: user.user_id.to_hex(),
        expires_at: user.expires_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds(username: &str, password: &str) -> Credentials {
        Credentials {
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    #[test]
    fn new_credentials_rules() {
        assert!(validate_new_credentials(&creds("admin", "long-enough")).is_ok());
        assert!(validate_new_credentials(&creds("", "long-enough")).is_err());
        assert!(validate_new_credentials(&creds("ad min", "long-enough")).is_err());
        assert!(validate_new_credentials(&creds("admin", "short")).is_err());
        assert!(validate_new_credentials(&creds(&"a".repeat(65), "long-enough")).is_err());
    }
}
