//! Signed session credentials.
//!
//! Sessions are HS256 JWTs signed with the server's session secret. The same
//! credential authenticates HTTP requests (bearer header or cookie) and
//! realtime upgrades (cookie or query parameter).

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use gantry_core::UserId;

use crate::error::{AuthError, Result};
use crate::AuthConfig;

/// Claims extracted from a validated session token.
#[derive(Debug, Clone)]
pub struct ValidatedSession {
    /// The account's username (`sub` claim).
    pub username: String,
    /// The account's user ID.
    pub user_id: UserId,
    /// When the session was issued.
    pub issued_at: DateTime<Utc>,
    /// When the session expires.
    pub expires_at: DateTime<Utc>,
}

/// An issued session token together with its expiry.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    /// The encoded token.
    pub token: String,
    /// When the token expires.
    pub expires_at: DateTime<Utc>,
}

/// Trait for validating session credentials.
#[async_trait]
pub trait SessionValidator: Send + Sync {
    /// Validate a session token and extract its claims.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is malformed, tampered with, or expired.
    async fn validate(&self, token: &str) -> Result<ValidatedSession>;

    /// The username a token claims, read without verifying it.
    ///
    /// Only for labelling audit records of rejected credentials. A claimed
    /// username never authorizes anything.
    fn claimed_username(&self, _token: &str) -> Option<String> {
        None
    }
}

/// Longest claimed username worth recording.
const MAX_CLAIMED_USERNAME_LEN: usize = 128;

fn plausible_username(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_CLAIMED_USERNAME_LEN
        && name.chars().all(|c| c.is_ascii_graphic())
}

/// Raw claims as encoded in the token.
#[derive(Debug, Serialize, Deserialize)]
struct SessionClaims {
    iss: String,
    sub: String,
    uid: String,
    iat: i64,
    exp: i64,
}

/// The one claim read from tokens that failed validation.
#[derive(Debug, Deserialize)]
struct ClaimedSubject {
    sub: String,
}

/// Issues and validates HS256 session tokens.
pub struct SessionSigner {
    config: AuthConfig,
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SessionSigner {
    /// Create a signer from the auth configuration.
    #[must_use]
    pub fn new(config: AuthConfig) -> Self {
        let encoding = EncodingKey::from_secret(config.session_secret.as_bytes());
        let decoding = DecodingKey::from_secret(config.session_secret.as_bytes());
        Self {
            config,
            encoding,
            decoding,
        }
    }

    /// Issue a session for `username`, valid for the configured TTL.
    ///
    /// # Errors
    ///
    /// Returns an error if the token cannot be encoded.
    pub fn issue(&self, username: &str) -> Result<IssuedSession> {
        self.issue_at(username, Utc::now())
    }

    /// Issue a session as if it had been created at `issued_at`.
    ///
    /// # Errors
    ///
    /// Returns an error if the token cannot be encoded.
    pub fn issue_at(&self, username: &str, issued_at: DateTime<Utc>) -> Result<IssuedSession> {
        let expires_at = i64::try_from(self.config.session_ttl_seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|ttl| issued_at.checked_add_signed(ttl))
            .ok_or_else(|| AuthError::Internal("session TTL out of range".to_string()))?;

        let claims = SessionClaims {
            iss: self.config.issuer.clone(),
            sub: username.to_string(),
            uid: UserId::for_username(username).to_hex(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Internal(format!("failed to sign session: {e}")))?;

        Ok(IssuedSession { token, expires_at })
    }
}

#[async_trait]
impl SessionValidator for SessionSigner {
    async fn validate(&self, token: &str) -> Result<ValidatedSession> {
        if token.is_empty() {
            return Err(AuthError::MissingCredential);
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.config.issuer]);
        validation.validate_aud = false;
        validation.validate_exp = true;
        validation.leeway = 0;

        let data = decode::<SessionClaims>(token, &self.decoding, &validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                jsonwebtoken::errors::ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
                jsonwebtoken::errors::ErrorKind::InvalidSignature => AuthError::InvalidSignature,
                _ => AuthError::InvalidToken(e.to_string()),
            }
        })?;

        let claims = data.claims;

        // The uid must be the one derived from the subject.
        let user_id = UserId::from_hex(&claims.uid).map_err(|_| AuthError::InvalidUserId)?;
        if user_id != UserId::for_username(&claims.sub) {
            return Err(AuthError::InvalidUserId);
        }

        let issued_at = DateTime::from_timestamp(claims.iat, 0)
            .ok_or_else(|| AuthError::InvalidToken("invalid iat timestamp".to_string()))?;
        let expires_at = DateTime::from_timestamp(claims.exp, 0)
            .ok_or_else(|| AuthError::InvalidToken("invalid exp timestamp".to_string()))?;

        Ok(ValidatedSession {
            username: claims.sub,
            user_id,
            issued_at,
            expires_at,
        })
    }

    fn claimed_username(&self, token: &str) -> Option<String> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_aud = false;
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        decode::<ClaimedSubject>(token, &self.decoding, &validation)
            .ok()
            .map(|data| data.claims.sub)
            .filter(|sub| plausible_username(sub))
    }
}

/// A mock session validator for testing.
///
/// Accepts tokens of the form `test-token:<username>`.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Default)]
pub struct MockSessionValidator;

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl SessionValidator for MockSessionValidator {
    async fn validate(&self, token: &str) -> Result<ValidatedSession> {
        let username = token
            .strip_prefix("test-token:")
            .filter(|name| !name.is_empty())
            .ok_or_else(|| AuthError::InvalidToken("expected test-token:<username>".to_string()))?;

        let now = Utc::now();
        Ok(ValidatedSession {
            username: username.to_string(),
            user_id: UserId::for_username(username),
            issued_at: now,
            expires_at: now + Duration::hours(1),
        })
    }

    fn claimed_username(&self, token: &str) -> Option<String> {
        token
            .strip_prefix("test-token:")
            .filter(|name| plausible_username(name))
            .map(str::to_string)
    }
}
