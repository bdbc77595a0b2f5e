//! Audit events.
//!
//! Events are emitted, not stored. Persisting them is the job of whatever
//! [`AuditSink`] the composition root installs.

use chrono::{DateTime, Utc};
use serde::Serialize;

use gantry_core::UserId;

/// Outcome recorded on an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditResult {
    /// The action was permitted and completed.
    Success,
    /// The action was refused by policy (bad credential, missing session).
    Denied,
    /// The action failed for another reason.
    Failure,
}

impl AuditResult {
    /// Lowercase label used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Denied => "denied",
            Self::Failure => "failure",
        }
    }
}

/// A single security-relevant event.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    /// What was attempted (e.g. `auth`, `login`, `setup`).
    pub action: String,
    /// How it ended.
    pub result: AuditResult,
    /// Free-form detail, never containing secrets.
    pub detail: String,
    /// Client IP, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    /// Username involved, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// User ID involved, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    /// When the event happened.
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    /// Start an event for `action` with the given result.
    #[must_use]
    pub fn new(action: impl Into<String>, result: AuditResult, detail: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            result,
            detail: detail.into(),
            ip: None,
            username: None,
            user_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach the client IP.
    #[must_use]
    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    /// Attach the username and its derived user ID.
    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        let username = username.into();
        self.user_id = Some(UserId::for_username(&username));
        self.username = Some(username);
        self
    }
}

/// Receiver of audit events.
///
/// `record` must not block; sinks that persist should hand off to their own task.
pub trait AuditSink: Send + Sync {
    /// Record an event.
    fn record(&self, event: AuditEvent);
}

/// Writes audit events to the `audit` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        let user_id = event.user_id.map(|id| id.to_hex());
        match event.result {
            AuditResult::Success => tracing::info!(
                target: "audit",
                action = %event.action,
                result = event.result.as_str(),
                detail = %event.detail,
                ip = ?event.ip,
                username = ?event.username,
                user_id = ?user_id,
                "Audit event"
            ),
            AuditResult::Denied | AuditResult::Failure => tracing::warn!(
                target: "audit",
                action = %event.action,
                result = event.result.as_str(),
                detail = %event.detail,
                ip = ?event.ip,
                username = ?event.username,
                user_id = ?user_id,
                "Audit event"
            ),
        }
    }
}

/// Collects audit events in memory for assertions.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: parking_lot::Mutex<Vec<AuditEvent>>,
}

#[cfg(any(test, feature = "test-utils"))]
impl MemoryAuditSink {
    /// Snapshot of everything recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        self.events.lock().push(event);
    }
}
