//! Connection state machine and session snapshot.
//!
//! ```text
//! Disconnected ──start──▶ Connecting ──handshake ok──▶ Connected
//!                              │                        │    ▲
//!                              │ failure     K probe    │    │ handshake ok
//!                              ▼             failures   ▼    │
//!                         Reconnecting ◀────────────────┘────┘
//!
//! any state ──stop / credential rejected──▶ Disconnected
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Lifecycle state of the gateway connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connection and no supervisor running.
    Disconnected,
    /// First connection attempt in progress.
    Connecting,
    /// Handshake completed; requests are accepted.
    Connected,
    /// The previous connection was lost; retrying with backoff.
    Reconnecting,
}

impl ConnectionState {
    /// Returns `true` if the transition `self → to` is part of the state machine.
    #[must_use]
    pub const fn can_transition_to(self, to: Self) -> bool {
        use ConnectionState::{Connected, Connecting, Disconnected, Reconnecting};
        matches!(
            (self, to),
            (Disconnected, Connecting)
                | (Connecting | Reconnecting, Connected)
                | (Connecting | Connected, Reconnecting)
                | (_, Disconnected)
        )
    }

    /// Lowercase label used in logs and events.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }
}

/// Point-in-time view of the gateway session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    /// Gateway host.
    pub host: String,
    /// Gateway port.
    pub port: u16,
    /// Whether a credential token is configured.
    pub has_credential: bool,
    /// Current connection state.
    pub state: ConnectionState,
    /// When the last liveness probe completed successfully.
    pub last_health_check_at: Option<DateTime<Utc>>,
    /// The most recent connection-level error.
    pub last_error: Option<String>,
    /// Reconnect attempts since the last healthy connection.
    pub backoff_attempt: u32,
    /// Consecutive failed liveness probes on the current connection.
    pub consecutive_failures: u32,
    /// Requests currently awaiting a response.
    pub in_flight: usize,
}

/// Mutable session bookkeeping kept by the client.
#[derive(Debug, Default)]
pub(crate) struct SessionStats {
    pub last_health_check_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub backoff_attempt: u32,
    pub consecutive_failures: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::{Connected, Connecting, Disconnected, Reconnecting};

    #[test]
    fn valid_transitions() {
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Reconnecting));
        assert!(Reconnecting.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Disconnected));
        assert!(Reconnecting.can_transition_to(Disconnected));
    }

    #[test]
    fn invalid_transitions() {
        assert!(!Disconnected.can_transition_to(Connected));
        assert!(!Disconnected.can_transition_to(Reconnecting));
        assert!(!Connected.can_transition_to(Connecting));
    }

    #[test]
    fn serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(Reconnecting).unwrap(),
            serde_json::json!("reconnecting")
        );
    }
}
