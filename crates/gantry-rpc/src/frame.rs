//! Wire frames exchanged with the automation gateway.
//!
//! Every WebSocket text message carries exactly one JSON frame:
//!
//! ```text
//! {"type":"req",  "id":"7", "method":"config.get", "params":{}}
//! {"type":"res",  "id":"7", "ok":true,  "payload":{...}}
//! {"type":"res",  "id":"7", "ok":false, "error":{"code":"NOT_FOUND","message":"..."}}
//! {"type":"event","event":"agent.status", "payload":{...}, "seq":12}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RpcError;

/// Protocol revision announced in the `connect` handshake.
pub const PROTOCOL_VERSION: u32 = 3;

/// One frame on the gateway connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    /// A correlated request.
    Req {
        /// Correlation ID, unique among in-flight requests.
        id: String,
        /// Method name.
        method: String,
        /// Parameter object.
        #[serde(default)]
        params: Value,
    },
    /// The response to a request.
    Res {
        /// Correlation ID of the request being answered.
        id: String,
        /// Whether the call succeeded.
        ok: bool,
        /// Result value on success.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        /// Error details on failure.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<FrameError>,
    },
    /// A gateway-initiated push notification.
    Event {
        /// Event name.
        event: String,
        /// Event body.
        #[serde(default)]
        payload: Value,
        /// Gateway sequence number, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
    },
}

/// Error object carried by a failed response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameError {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
}

impl FrameError {
    /// Build an error object.
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Whether the gateway is refusing our credential.
    #[must_use]
    pub fn is_auth_rejection(&self) -> bool {
        is_auth_code(&self.code)
    }
}

/// Error codes the gateway uses to refuse a credential.
pub(crate) fn is_auth_code(code: &str) -> bool {
    matches!(
        code,
        "AUTH_REJECTED" | "UNAUTHORIZED" | "AUTH_FAILED" | "FORBIDDEN"
    )
}

/// Text from the gateway that did not decode as a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedFrame {
    /// Correlation ID of the response it claims to be, when one is readable.
    pub id: Option<String>,
    /// Why decoding failed.
    pub reason: String,
}

impl MalformedFrame {
    fn from_text(text: &str, reason: String) -> Self {
        let id = serde_json::from_str::<Value>(text).ok().and_then(|value| {
            if value.get("type").and_then(Value::as_str) != Some("res") {
                return None;
            }
            match value.get("id")? {
                Value::String(id) => Some(id.clone()),
                Value::Number(id) => Some(id.to_string()),
                _ => None,
            }
        });
        Self { id, reason }
    }
}

/// One message received from the gateway.
pub type Received = Result<Frame, MalformedFrame>;

impl Frame {
    /// Build a request frame.
    #[must_use]
    pub fn request(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self::Req {
            id: id.to_string(),
            method: method.into(),
            params,
        }
    }

    /// Build a response frame from a call outcome.
    #[must_use]
    pub fn response(id: impl Into<String>, outcome: Result<Value, FrameError>) -> Self {
        match outcome {
            Ok(payload) => Self::Res {
                id: id.into(),
                ok: true,
                payload: Some(payload),
                error: None,
            },
            Err(error) => Self::Res {
                id: id.into(),
                ok: false,
                payload: None,
                error: Some(error),
            },
        }
    }

    /// Build an event frame.
    #[must_use]
    pub fn event(event: impl Into<String>, payload: Value) -> Self {
        Self::Event {
            event: event.into(),
            payload,
            seq: None,
        }
    }

    /// Decode a frame from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Protocol`] if the text is not a valid frame.
    pub fn decode(text: &str) -> Result<Self, RpcError> {
        serde_json::from_str(text).map_err(|e| RpcError::Protocol(format!("invalid frame: {e}")))
    }

    /// Decode a received message, keeping the correlation ID of a response
    /// that fails to decode so its caller can be failed right away.
    ///
    /// # Errors
    ///
    /// Returns a [`MalformedFrame`] if the text is not a valid frame.
    pub fn parse(text: &str) -> Received {
        serde_json::from_str(text)
            .map_err(|e| MalformedFrame::from_text(text, format!("invalid frame: {e}")))
    }

    /// Encode the frame as JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Protocol`] if a value cannot be serialized.
    pub fn encode(&self) -> Result<String, RpcError> {
        serde_json::to_string(self).map_err(|e| RpcError::Protocol(format!("encode failed: {e}")))
    }
}

/// Convert the body of a `res` frame into a call outcome.
pub(crate) fn response_outcome(
    ok: bool,
    payload: Option<Value>,
    error: Option<FrameError>,
) -> Result<Value, RpcError> {
    match (ok, error) {
        (true, _) => Ok(payload.unwrap_or(Value::Null)),
        (false, Some(error)) => Err(RpcError::Remote {
            code: error.code,
            message: error.message,
        }),
        (false, None) => Err(RpcError::Protocol(
            "failed response without an error object".to_string(),
        )),
    }
}
