//! Core identifier types for gantry.
//!
//! This module provides strongly-typed identifiers for users, realtime
//! connections, and inbound requests.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum accepted length of a client-supplied request ID.
pub const MAX_REQUEST_ID_LEN: usize = 64;

/// A 32-byte user identifier, hex-encoded for display.
///
/// User IDs are derived from the account's username with blake3 so that the
/// same account always maps to the same ID without a lookup.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId([u8; 32]);

impl UserId {
    /// Create a new `UserId` from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Derive the `UserId` for a username.
    #[must_use]
    pub fn for_username(username: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"gantry:user:");
        hasher.update(username.as_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    /// Parse a `UserId` from a hex-encoded string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not valid hex or not exactly 64 characters.
    pub fn from_hex(s: &str) -> Result<Self, IdError> {
        let bytes = hex::decode(s).map_err(|_| IdError::InvalidHex)?;
        let arr: [u8; 32] = bytes.try_into().map_err(|_| IdError::InvalidLength {
            expected: 32,
            got: s.len() / 2,
        })?;
        Ok(Self(arr))
    }

    /// Return the underlying bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Return the hex-encoded string representation.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.to_hex())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl TryFrom<String> for UserId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.to_hex()
    }
}

/// Identifier of a live realtime (WebSocket) connection.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConnectionId(uuid::Uuid);

impl ConnectionId {
    /// Generate a new random `ConnectionId`.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Return the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl FromStr for ConnectionId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = uuid::Uuid::parse_str(s).map_err(|_| IdError::InvalidUuid)?;
        Ok(Self(uuid))
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({})", self.0)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for ConnectionId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ConnectionId> for String {
    fn from(id: ConnectionId) -> Self {
        id.0.to_string()
    }
}

/// Per-request correlation ID used for tracing and the response envelope.
///
/// Generated as a UUID v4, or taken from a client's `x-request-id` header
/// when that value is short and limited to `[A-Za-z0-9._-]`.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RequestId(String);

impl RequestId {
    /// Generate a new random `RequestId`.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Return the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for RequestId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s.len() > MAX_REQUEST_ID_LEN {
            return Err(IdError::InvalidLength {
                expected: MAX_REQUEST_ID_LEN,
                got: s.len(),
            });
        }
        if !s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
        {
            return Err(IdError::InvalidCharacters);
        }
        Ok(Self(s.to_string()))
    }
}

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestId({})", self.0)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RequestId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RequestId> for String {
    fn from(id: RequestId) -> Self {
        id.0
    }
}

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The input string contains invalid hexadecimal characters.
    #[error("invalid hex encoding")]
    InvalidHex,

    /// The input has an incorrect length.
    #[error("invalid length: expected {expected} bytes, got {got}")]
    InvalidLength {
        /// The expected (or maximum) number of bytes.
        expected: usize,
        /// The actual number of bytes.
        got: usize,
    },

    /// The input is not a valid UUID.
    #[error("invalid UUID format")]
    InvalidUuid,

    /// The input contains characters outside the allowed set.
    #[error("invalid characters")]
    InvalidCharacters,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_roundtrip() {
        let id = UserId::from_bytes([0x42u8; 32]);
        let parsed = UserId::from_hex(&id.to_hex()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn user_id_invalid_hex() {
        let result = UserId::from_hex("not-valid-hex");
        assert!(matches!(result, Err(IdError::InvalidHex)));
    }

    #[test]
    fn user_id_wrong_length() {
        let result = UserId::from_hex("deadbeef");
        assert!(matches!(result, Err(IdError::InvalidLength { .. })));
    }

    #[test]
    fn user_id_is_stable_per_username() {
        assert_eq!(UserId::for_username("admin"), UserId::for_username("admin"));
        assert_ne!(UserId::for_username("admin"), UserId::for_username("ops"));
    }

    #[test]
    fn connection_ids_are_unique() {
        assert_ne!(ConnectionId::generate(), ConnectionId::generate());
    }

    #[test]
    fn connection_id_rejects_garbage() {
        let result = ConnectionId::from_str("not-a-uuid");
        assert!(matches!(result, Err(IdError::InvalidUuid)));
    }

    #[test]
    fn request_id_accepts_safe_client_values() {
        let id: RequestId = "trace-01.abc_DEF".parse().unwrap();
        assert_eq!(id.as_str(), "trace-01.abc_DEF");
    }

    #[test]
    fn request_id_rejects_header_injection() {
        assert!(matches!(
            RequestId::from_str("abc\r\nx-evil: 1"),
            Err(IdError::InvalidCharacters)
        ));
        assert!(RequestId::from_str("").is_err());
        assert!(RequestId::from_str(&"a".repeat(MAX_REQUEST_ID_LEN + 1)).is_err());
    }

    #[test]
    fn generated_request_id_parses() {
        let id = RequestId::generate();
        assert_eq!(RequestId::from_str(id.as_str()).unwrap(), id);
    }

    #[test]
    fn user_id_serde_json() {
        let id = UserId::for_username("admin");
        let json = serde_json::to_string(&id).unwrap();
        let parsed: UserId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }
}
