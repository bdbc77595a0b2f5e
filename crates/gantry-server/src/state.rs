//! Server application state.
//!
//! This module defines the shared state that is available to all request
//! handlers and middleware stages.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use gantry_auth::{AccountDirectory, AuditSink, SessionSigner, SessionValidator};
use gantry_rpc::GatewayClient;

use crate::config::ServerConfig;
use crate::hub::HubHandle;
use crate::rate_limit::RateLimiter;

/// Shared application state.
///
/// Every field is a cheap handle; cloning the state clones handles, never
/// the services behind them.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// The single gateway connection.
    pub gateway: GatewayClient,
    /// Realtime broadcast hub.
    pub hub: HubHandle,
    /// Limiter for sensitive paths.
    pub limiter: Arc<RateLimiter>,
    /// Issues session tokens on login and setup.
    pub signer: Arc<SessionSigner>,
    /// Validates session tokens on every authenticated request.
    pub validator: Arc<dyn SessionValidator>,
    /// Account verification and initial setup.
    pub accounts: Arc<dyn AccountDirectory>,
    /// Receiver of audit events.
    pub audit: Arc<dyn AuditSink>,
    /// Fires when the server begins shutting down. Long-lived streams end on it.
    pub shutdown: CancellationToken,
}
