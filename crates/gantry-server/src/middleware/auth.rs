//! Session authentication stage.
//!
//! Every path outside the skip-list needs a valid session. Failures are
//! reported to the audit sink before the `AUTH_UNAUTHORIZED` response goes out,
//! labelled with the username the rejected credential claims, if any.

use axum::extract::{Request, State};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::Response;

use gantry_auth::{AuditEvent, AuditResult, AuthError};

use crate::auth::{client_ip, session_token, AuthUser, ClientIp};
use crate::error::ApiError;
use crate::state::AppState;

/// Auth stage.
pub async fn require_session(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if request.method() == Method::OPTIONS || state.config.skips_auth(request.uri().path()) {
        return Ok(next.run(request).await);
    }

    let ip = ClientIp(client_ip(
        request.headers(),
        request.extensions(),
        state.config.trust_forwarded_for,
    ));

    let token = session_token(request.headers());
    let outcome = match &token {
        Some(token) => state.validator.validate(token).await,
        None => Err(AuthError::MissingCredential),
    };

    match outcome {
        Ok(session) => {
            tracing::debug!(username = %session.username, "Session validated");
            request.extensions_mut().insert(AuthUser::from(session));
            Ok(next.run(request).await)
        }
        Err(err) => {
            let mut event = AuditEvent::new(
                "auth",
                AuditResult::Denied,
                format!("{} {}: {err}", request.method(), request.uri().path()),
            )
            .with_ip(ip.label());
            if let Some(username) = token
                .as_deref()
                .and_then(|token| state.validator.claimed_username(token))
            {
                event = event.with_username(username);
            }
            state.audit.record(event);
            Err(ApiError::from(err))
        }
    }
}
