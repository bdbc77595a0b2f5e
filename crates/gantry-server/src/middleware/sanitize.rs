//! Input sanitisation.
//!
//! Rejects NUL and other C0 control characters (tab, CR and LF excepted) and
//! DEL in the path, the query string and every string of a JSON body,
//! including object keys. Percent-encoded forms are decoded before checking.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use serde_json::Value;

use crate::error::ApiError;
use crate::state::AppState;

/// Whether `c` is disallowed in user input.
#[must_use]
pub const fn is_forbidden(c: char) -> bool {
    (c < ' ' && !matches!(c, '\t' | '\n' | '\r')) || c == '\u{7f}'
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Whether a raw URI component contains a forbidden character, literally or
/// percent-encoded.
#[must_use]
pub fn uri_component_is_dirty(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let byte = bytes[i];
        if byte == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                if is_forbidden(char::from((hi << 4) | lo)) {
                    return true;
                }
                i += 3;
                continue;
            }
        }
        if is_forbidden(char::from(byte)) {
            return true;
        }
        i += 1;
    }
    false
}

/// Whether any string in `value` contains a forbidden character.
#[must_use]
pub fn json_is_dirty(value: &Value) -> bool {
    match value {
        Value::String(s) => s.chars().any(is_forbidden),
        Value::Array(items) => items.iter().any(json_is_dirty),
        Value::Object(map) => map
            .iter()
            .any(|(key, v)| key.chars().any(is_forbidden) || json_is_dirty(v)),
        Value::Null | Value::Bool(_) | Value::Number(_) => false,
    }
}

fn declares_json(request: &Request) -> bool {
    request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"))
}

/// Input sanitisation stage.
///
/// Bodies are checked whenever they parse as JSON, whatever their declared
/// content type. Other bodies are checked byte by byte. A body declared as JSON that does not parse is refused
/// here.
pub async fn sanitize_input(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if uri_component_is_dirty(request.uri().path()) {
        return Err(ApiError::InputInvalid("control characters in path".to_string()));
    }
    if request.uri().query().is_some_and(uri_component_is_dirty) {
        return Err(ApiError::InputInvalid("control characters in query".to_string()));
    }

    let declared_json = declares_json(&request);
    let limit = state.config.max_body_bytes;
    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, limit)
        .await
        .map_err(|_| ApiError::BodyTooLarge { limit })?;

    if !bytes.is_empty() {
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(value) if json_is_dirty(&value) => {
                return Err(ApiError::InputInvalid("control characters in body".to_string()));
            }
            Ok(_) => {}
            Err(e) if declared_json => {
                return Err(ApiError::BadRequest(format!("malformed JSON body: {e}")));
            }
            Err(_) if bytes.iter().any(|&b| is_forbidden(char::from(b))) => {
                return Err(ApiError::InputInvalid("control characters in body".to_string()));
            }
            Err(_) => {}
        }
    }

    Ok(next.run(Request::from_parts(parts, Body::from(bytes))).await)
}
