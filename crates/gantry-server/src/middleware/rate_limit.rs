//! Rate limiting stage for sensitive paths.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::auth::{client_ip, ClientIp};
use crate::error::ApiError;
use crate::state::AppState;

/// Rate limit stage. Only paths listed in the configuration are counted.
pub async fn rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !state.config.rate_limit.applies_to(request.uri().path()) {
        return Ok(next.run(request).await);
    }

    let ip = ClientIp(client_ip(
        request.headers(),
        request.extensions(),
        state.config.trust_forwarded_for,
    ));
    let key = format!("{}|{}", ip.label(), request.uri().path());

    if !state.limiter.allow(&key) {
        let wait = state.limiter.retry_after(&key);
        let retry_after_secs = (wait.as_secs() + u64::from(wait.subsec_nanos() > 0)).max(1);
        tracing::warn!(
            ip = %ip.label(),
            path = %request.uri().path(),
            retry_after_secs,
            "Rate limit exceeded"
        );
        return Err(ApiError::RateLimited { retry_after_secs });
    }

    Ok(next.run(request).await)
}
