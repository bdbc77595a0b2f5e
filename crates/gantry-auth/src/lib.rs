//! Session authentication for gantry.
//!
//! This crate provides:
//!
//! - HS256 session tokens issued at login and validated on every request
//! - The [`AccountDirectory`] seam to the external account store
//! - Audit events and the [`AuditSink`] they are emitted to
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌──────────────────┐
//! │   Server         │────▶│ SessionValidator │
//! │   (HTTP/WS)      │     │   (trait)        │
//! └───────┬──────────┘     └────────┬─────────┘
//!         │                         │
//!         │                ┌────────▼─────────┐
//!         │                │  SessionSigner   │
//!         │                │  (HS256)         │
//!         │                └──────────────────┘
//!         │
//!         ├──────────────▶ AccountDirectory (login / setup)
//!         └──────────────▶ AuditSink (denied / success events)
//! ```
//!
//! # Example
//!
//! ```
//! use gantry_auth::{AuthConfig, SessionSigner, SessionValidator};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let signer = SessionSigner::new(AuthConfig {
//!     session_secret: "change-me-change-me-change-me-change-me".to_string(),
//!     ..AuthConfig::default()
//! });
//!
//! let issued = signer.issue("admin")?;
//! let session = signer.validate(&issued.token).await?;
//! assert_eq!(session.username, "admin");
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

use std::fmt;

pub mod accounts;
pub mod audit;
pub mod error;
pub mod session;

pub use accounts::{AccountDirectory, InMemoryAccounts, Principal};
pub use audit::{AuditEvent, AuditResult, AuditSink, TracingAuditSink};
pub use error::{AuthError, Result};
pub use session::{IssuedSession, SessionSigner, SessionValidator, ValidatedSession};

#[cfg(any(test, feature = "test-utils"))]
pub use audit::MemoryAuditSink;
#[cfg(any(test, feature = "test-utils"))]
pub use session::MockSessionValidator;

/// Configuration for session signing.
#[derive(Clone)]
pub struct AuthConfig {
    /// HMAC secret used to sign session tokens.
    pub session_secret: String,
    /// Expected `iss` claim.
    pub issuer: String,
    /// Session lifetime in seconds.
    pub session_ttl_seconds: u64,
}

impl AuthConfig {
    /// Minimum secret length accepted by [`AuthConfig::validate`].
    pub const MIN_SECRET_LEN: usize = 32;

    /// Check that the configuration is safe to run with.
    ///
    /// # Errors
    ///
    /// Returns an error if the secret is shorter than [`Self::MIN_SECRET_LEN`].
    pub fn validate(&self) -> Result<()> {
        if self.session_secret.len() < Self::MIN_SECRET_LEN {
            return Err(AuthError::Internal(format!(
                "session secret must be at least {} bytes",
                Self::MIN_SECRET_LEN
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("session_secret", &"<redacted>")
            .field("issuer", &self.issuer)
            .field("session_ttl_seconds", &self.session_ttl_seconds)
            .finish()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_secret: String::new(),
            issuer: "gantry".to_string(),
            session_ttl_seconds: 24 * 60 * 60,
        }
    }
}
