//! Error types for gateway RPC.

use thiserror::Error;

/// A result type using `RpcError`.
pub type Result<T> = std::result::Result<T, RpcError>;

/// Errors surfaced by the gateway client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    /// The gateway is not currently connected, or the connection dropped
    /// while the call was in flight.
    #[error("gateway unreachable: {0}")]
    Unreachable(String),

    /// No response arrived before the caller's deadline.
    #[error("gateway request timed out")]
    Timeout,

    /// The gateway refused our credential during the handshake.
    #[error("gateway rejected credentials: {0}")]
    AuthRejected(String),

    /// The gateway sent something we cannot interpret.
    #[error("gateway protocol error: {0}")]
    Protocol(String),

    /// The client was stopped while the call was in flight.
    #[error("request cancelled")]
    Cancelled,

    /// The gateway answered the call with an error.
    #[error("gateway error {code}: {message}")]
    Remote {
        /// Gateway error code.
        code: String,
        /// Gateway error message.
        message: String,
    },
}

impl RpcError {
    /// Returns `true` for failures that say the connection itself is unhealthy.
    ///
    /// These count towards the health-check failure threshold and lead to a
    /// reconnect. `AuthRejected` is not one of them.
    #[must_use]
    pub const fn is_connection_failure(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Timeout)
    }

    /// Returns `true` if the same call may succeed if retried later without
    /// any configuration change.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Unreachable(_) | Self::Timeout | Self::Cancelled | Self::Protocol(_)
        )
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Unreachable(_) => "unreachable",
            Self::Timeout => "timeout",
            Self::AuthRejected(_) => "auth_rejected",
            Self::Protocol(_) => "protocol",
            Self::Cancelled => "cancelled",
            Self::Remote { .. } => "remote",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_rejection_is_not_retried() {
        let err = RpcError::AuthRejected("bad token".into());
        assert!(!err.is_retriable());
        assert!(!err.is_connection_failure());
    }

    #[test]
    fn transient_failures_drive_reconnect() {
        assert!(RpcError::Timeout.is_connection_failure());
        assert!(RpcError::Unreachable("closed".into()).is_connection_failure());
        assert!(!RpcError::Cancelled.is_connection_failure());
    }
}
