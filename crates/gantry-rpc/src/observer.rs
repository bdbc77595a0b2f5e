//! Observer seams between the client and the rest of the system.
//!
//! The client knows nothing about browsers or process supervision. It calls
//! a [`NotifySink`] for every push event and a [`RestartHook`] when a healthy
//! connection dies. Both traits are implemented for plain closures.

use serde::Serialize;
use serde_json::Value;

use crate::error::RpcError;

/// A push notification received from the gateway.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    /// Event name as sent by the gateway.
    pub event: String,
    /// Event body.
    pub payload: Value,
    /// Gateway sequence number, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

/// Receives gateway push notifications.
///
/// Called from the connection's receive path; implementations must not block.
pub trait NotifySink: Send + Sync {
    /// Handle one notification.
    fn on_notify(&self, notification: Notification);
}

impl<F> NotifySink for F
where
    F: Fn(Notification) + Send + Sync,
{
    fn on_notify(&self, notification: Notification) {
        self(notification);
    }
}

/// Invoked when an established connection is lost for good and the client
/// starts reconnecting, e.g. to restart a locally managed gateway process.
///
/// Implementations must not block; spawn a task for slow work.
pub trait RestartHook: Send + Sync {
    /// Handle a fatal disconnect.
    fn on_fatal_disconnect(&self, error: &RpcError);
}

impl<F> RestartHook for F
where
    F: Fn(&RpcError) + Send + Sync,
{
    fn on_fatal_disconnect(&self, error: &RpcError) {
        self(error);
    }
}
