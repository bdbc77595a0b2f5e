//! Per-request correlation IDs.
//!
//! The ID is taken from a well-formed client `x-request-id` header or
//! generated, then echoed on the response. While the inner stages run it is
//! also available through a task-local, so error envelopes built anywhere
//! below this stage carry the same ID.

use axum::extract::Request;
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;

use gantry_core::RequestId;

/// Header carrying the request ID.
pub static REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

tokio::task_local! {
    static CURRENT: RequestId;
}

/// The ID of the request being handled on this task, if any.
#[must_use]
pub fn current() -> Option<RequestId> {
    CURRENT.try_with(Clone::clone).ok()
}

/// The current ID, or a fresh one outside a request scope.
#[must_use]
pub fn current_or_generate() -> RequestId {
    current().unwrap_or_else(RequestId::generate)
}

/// Assign the request ID and run the rest of the pipeline inside its scope.
pub async fn assign_request_id(mut request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get(&REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<RequestId>().ok())
        .unwrap_or_else(RequestId::generate);

    let header = HeaderValue::from_str(id.as_str()).ok();
    if let Some(value) = &header {
        request
            .headers_mut()
            .insert(REQUEST_ID_HEADER.clone(), value.clone());
    }
    request.extensions_mut().insert(id.clone());

    let mut response = CURRENT.scope(id, next.run(request)).await;
    if let Some(value) = header {
        response
            .headers_mut()
            .insert(REQUEST_ID_HEADER.clone(), value);
    }
    response
}
