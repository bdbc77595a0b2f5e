//! Account verification.
//!
//! Account storage and password policy belong to an external collaborator;
//! the server only talks to it through [`AccountDirectory`].

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use gantry_core::UserId;

use crate::error::{AuthError, Result};

/// An authenticated account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// The account's user ID.
    pub user_id: UserId,
    /// The account's username.
    pub username: String,
}

impl Principal {
    /// Build the principal for a username.
    #[must_use]
    pub fn new(username: impl Into<String>) -> Self {
        let username = username.into();
        Self {
            user_id: UserId::for_username(&username),
            username,
        }
    }
}

/// Source of truth for administrator accounts.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// Check a username/password pair.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidCredentials`] if the pair does not match.
    async fn verify(&self, username: &str, password: &str) -> Result<Principal>;

    /// Whether no administrator exists yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be queried.
    async fn needs_setup(&self) -> Result<bool>;

    /// Create the first administrator.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::SetupAlreadyCompleted`] once any account exists.
    async fn create_initial_admin(&self, username: &str, password: &str) -> Result<Principal>;
}

/// Process-local account directory.
///
/// Passwords are kept as blake3 keyed digests under a per-process random key.
/// Nothing survives a restart.
pub struct InMemoryAccounts {
    key: [u8; 32],
    accounts: RwLock<HashMap<String, blake3::Hash>>,
}

impl InMemoryAccounts {
    /// Create an empty directory; the first `create_initial_admin` call succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self {
            key: rand::random(),
            accounts: RwLock::new(HashMap::new()),
        }
    }

    /// Create a directory seeded with one administrator.
    #[must_use]
    pub fn with_admin(username: &str, password: &str) -> Self {
        let directory = Self::new();
        let digest = directory.digest(password);
        directory.accounts.write().insert(username.to_string(), digest);
        directory
    }

    fn digest(&self, password: &str) -> blake3::Hash {
        blake3::keyed_hash(&self.key, password.as_bytes())
    }
}

impl Default for InMemoryAccounts {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccountDirectory for InMemoryAccounts {
    async fn verify(&self, username: &str, password: &str) -> Result<Principal> {
        let candidate = self.digest(password);
        let accounts = self.accounts.read();

        // blake3::Hash equality is constant-time.
        match accounts.get(username) {
            Some(stored) if *stored == candidate => Ok(Principal::new(username)),
            _ => Err(AuthError::InvalidCredentials),
        }
    }

    async fn needs_setup(&self) -> Result<bool> {
        Ok(self.accounts.read().is_empty())
    }

    async fn create_initial_admin(&self, username: &str, password: &str) -> Result<Principal> {
        let digest = self.digest(password);
        let mut accounts = self.accounts.write();
        if !accounts.is_empty() {
            return Err(AuthError::SetupAlreadyCompleted);
        }
        accounts.insert(username.to_string(), digest);
        tracing::info!(username = %username, "Initial administrator created");
        Ok(Principal::new(username))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seeded_admin_verifies() {
        let accounts = InMemoryAccounts::with_admin("admin", "hunter2hunter2");

        let principal = accounts.verify("admin", "hunter2hunter2").await.unwrap();
        assert_eq!(principal.username, "admin");
        assert!(!accounts.needs_setup().await.unwrap());
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_user_are_rejected() {
        let accounts = InMemoryAccounts::with_admin("admin", "hunter2hunter2");

        assert!(matches!(
            accounts.verify("admin", "wrong").await,
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            accounts.verify("nobody", "hunter2hunter2").await,
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn setup_only_once() {
        let accounts = InMemoryAccounts::new();
        assert!(accounts.needs_setup().await.unwrap());

        accounts
            .create_initial_admin("admin", "correct horse")
            .await
            .unwrap();
        assert!(!accounts.needs_setup().await.unwrap());

        let err = accounts
            .create_initial_admin("second", "battery staple")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::SetupAlreadyCompleted));
    }
}
