//! Router configuration.
//!
//! This module sets up the Axum router with all routes and the admission
//! pipeline.

use axum::body::Body;
use axum::extract::DefaultBodyLimit;
use axum::http::Request;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::{DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tower_http::LatencyUnit;
use tracing::Level;

use crate::error::not_found;
use crate::handlers::{auth, health, proxy, ws};
use crate::middleware::{self, request_id::REQUEST_ID_HEADER};
use crate::state::AppState;

/// Create the router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health`, `GET /api/health` - Health check
/// - `POST /api/auth/login` - Log in
/// - `POST /api/auth/setup` - Create the first administrator
/// - `GET /api/auth/status` - Setup and session status
/// - `GET /ws` - Realtime events (authenticated by the hub)
///
/// ## Authenticated
/// - `POST /api/auth/logout` - Clear the session cookie
/// - `GET /api/auth/me` - Current user
/// - `POST /api/gateway/call/:method` - Forward one call
/// - `POST /api/gateway/stream/:method` - Forward one call, streaming progress
/// - `GET /api/gateway/status` - Gateway connection status
/// - `GET /api/config` - Gateway configuration
/// - `GET /api/logs/stream` - Gateway log tail
pub fn create_router(state: AppState) -> Router {
    admission(routes(), state)
}

fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/health", get(health::health))
        // Auth
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/setup", post(auth::setup))
        .route("/api/auth/status", get(auth::status))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/me", get(auth::me))
        // Gateway
        .route("/api/gateway/call/:method", post(proxy::call))
        .route("/api/gateway/stream/:method", post(proxy::stream_call))
        .route("/api/gateway/status", get(proxy::status))
        .route("/api/config", get(proxy::config))
        .route("/api/logs/stream", get(proxy::logs_stream))
        // Realtime
        .route("/ws", get(ws::websocket_handler))
        .fallback(not_found)
}

/// Wrap `router` in the admission pipeline, outermost stage first.
///
/// Recovery sits outside the request ID stage, so a panic envelope carries
/// a freshly generated `request_id` rather than the `X-Request-ID` of the
/// request that panicked.
fn admission(router: Router<AppState>, state: AppState) -> Router {
    let trace = TraceLayer::new_for_http()
        .make_span_with(request_span)
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(
            DefaultOnResponse::new()
                .level(Level::INFO)
                .latency_unit(LatencyUnit::Millis),
        )
        .on_failure(
            DefaultOnFailure::new()
                .level(Level::ERROR)
                .latency_unit(LatencyUnit::Millis),
        );

    let pipeline = ServiceBuilder::new()
        .layer(CatchPanicLayer::custom(middleware::panic_response))
        .layer(from_fn(middleware::security_headers))
        .layer(from_fn(middleware::assign_request_id))
        .layer(trace)
        .layer(from_fn_with_state(state.clone(), middleware::cors))
        .layer(from_fn_with_state(state.clone(), middleware::limit_body))
        .layer(from_fn_with_state(state.clone(), middleware::rate_limit))
        .layer(from_fn_with_state(state.clone(), middleware::sanitize_input))
        .layer(from_fn_with_state(state.clone(), middleware::require_session));

    router
        .layer(pipeline)
        .layer(DefaultBodyLimit::max(state.config.max_body_bytes))
        .with_state(state)
}

fn request_span(request: &Request<Body>) -> tracing::Span {
    let request_id = request
        .headers()
        .get(&REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");
    tracing::info_span!(
        "request",
        method = %request.method(),
        path = %request.uri().path(),
        request_id = %request_id,
    )
}
