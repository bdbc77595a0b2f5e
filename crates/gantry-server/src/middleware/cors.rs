//! Deny-by-default CORS.
//!
//! Requests without an `Origin` header and same-origin requests pass
//! untouched. Cross-origin requests are admitted only from the allow-list;
//! everything else is refused with `FORBIDDEN_ORIGIN` and never receives a
//! permissive header. WebSocket upgrades are left to the realtime hub, which
//! checks the origin itself and can close with an explicit reason.

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::ApiError;
use crate::state::AppState;

const ALLOW_METHODS: &str = "GET, POST, PUT, PATCH, DELETE, OPTIONS";
const ALLOW_HEADERS: &str = "authorization, content-type, x-request-id";
const MAX_AGE_SECS: &str = "600";

/// Whether `origin` names the same host the request was sent to.
pub fn is_same_origin(origin: &str, headers: &HeaderMap) -> bool {
    let Some(host) = headers.get(header::HOST).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    origin
        .split_once("://")
        .is_some_and(|(_, authority)| authority.eq_ignore_ascii_case(host))
}

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

/// CORS stage.
pub async fn cors(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(origin) = request
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
    else {
        return next.run(request).await;
    };

    if is_websocket_upgrade(request.headers()) || is_same_origin(&origin, request.headers()) {
        return next.run(request).await;
    }

    if !state.config.origin_allowed(&origin) {
        tracing::warn!(origin = %origin, path = %request.uri().path(), "Rejected cross-origin request");
        return ApiError::ForbiddenOrigin.into_response();
    }

    let Ok(origin_value) = HeaderValue::from_str(&origin) else {
        return ApiError::ForbiddenOrigin.into_response();
    };

    let preflight = request.method() == Method::OPTIONS
        && request
            .headers()
            .contains_key(header::ACCESS_CONTROL_REQUEST_METHOD);

    let mut response = if preflight {
        let mut response = StatusCode::NO_CONTENT.into_response();
        let headers = response.headers_mut();
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOW_METHODS),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOW_HEADERS),
        );
        headers.insert(
            header::ACCESS_CONTROL_MAX_AGE,
            HeaderValue::from_static(MAX_AGE_SECS),
        );
        response
    } else {
        next.run(request).await
    };

    let headers = response.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin_value);
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );
    headers.append(header::VARY, HeaderValue::from_static("Origin"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_origin_matches_host() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("admin.local:8080"));
        assert!(is_same_origin("http://admin.local:8080", &headers));
        assert!(is_same_origin("https://ADMIN.local:8080", &headers));
        assert!(!is_same_origin("http://admin.local:9090", &headers));
        assert!(!is_same_origin("null", &headers));
    }

    #[test]
    fn no_host_is_never_same_origin() {
        assert!(!is_same_origin("http://a", &HeaderMap::new()));
    }
}
