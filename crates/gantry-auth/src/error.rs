//! Authentication error types.

use thiserror::Error;

/// A result type using `AuthError`.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Errors that can occur during authentication.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No session credential was presented.
    #[error("missing credential")]
    MissingCredential,

    /// The session token has expired.
    #[error("token expired")]
    TokenExpired,

    /// The session token signature is invalid.
    #[error("invalid signature")]
    InvalidSignature,

    /// The session token issuer does not match the expected value.
    #[error("invalid issuer")]
    InvalidIssuer,

    /// The user ID in the token is malformed or does not match the subject.
    #[error("invalid user ID")]
    InvalidUserId,

    /// The token format is invalid.
    #[error("invalid token format: {0}")]
    InvalidToken(String),

    /// Username or password did not match.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Initial setup was requested after an administrator already exists.
    #[error("setup already completed")]
    SetupAlreadyCompleted,

    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Returns `true` if this error indicates the client should re-authenticate
    /// and try again.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::TokenExpired | Self::MissingCredential)
    }

    /// Returns the appropriate HTTP status code for this error.
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::MissingCredential
            | Self::TokenExpired
            | Self::InvalidSignature
            | Self::InvalidIssuer
            | Self::InvalidUserId
            | Self::InvalidToken(_)
            | Self::InvalidCredentials => 401,
            Self::SetupAlreadyCompleted => 409,
            Self::Internal(_) => 500,
        }
    }
}
