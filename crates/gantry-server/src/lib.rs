//! Admin server for a single automation gateway.
//!
//! This crate is the browser-facing half of gantry. It handles:
//!
//! - Session login, initial setup and audit of authentication decisions
//! - Forwarding of browser calls to the gateway, plain or as event streams
//! - A realtime WebSocket hub broadcasting gateway and server events
//! - An admission pipeline (CORS, body cap, rate limit, sanitising, auth)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Browser admin UI                         │
//! │                (HTTP / SSE / WebSocket)                      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       gantry-server                          │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────────┐    │
//! │  │  Admission  │ │   Router    │ │    Realtime hub     │    │
//! │  │  pipeline   │ │ + Handlers  │ │   (one coordinator) │    │
//! │  └─────────────┘ └─────────────┘ └─────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!               ┌──────────────┴──────────────┐
//!               ▼                             ▼
//!        ┌─────────────┐               ┌─────────────┐
//!        │ gantry-auth │               │ gantry-rpc  │──▶ gateway
//!        └─────────────┘               └─────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use gantry_auth::{AuthConfig, InMemoryAccounts, SessionSigner, TracingAuditSink};
//! use gantry_rpc::{GatewayClient, GatewayClientConfig};
//! use gantry_server::{App, ServerConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let signer = SessionSigner::new(AuthConfig {
//!     session_secret: std::env::var("SESSION_SECRET")?,
//!     ..AuthConfig::default()
//! });
//! let gateway = GatewayClient::new(GatewayClientConfig::new("127.0.0.1", 18789));
//!
//! let app = App::new(
//!     ServerConfig::default(),
//!     gateway,
//!     signer,
//!     Arc::new(InMemoryAccounts::new()),
//!     Arc::new(TracingAuditSink),
//! );
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! app.serve(listener, async {
//!     let _ = tokio::signal::ctrl_c().await;
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod app;
pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod hub;
pub mod middleware;
pub mod notify;
pub mod rate_limit;
pub mod routes;
pub mod state;

pub use app::App;
pub use config::{HubConfig, RateLimitConfig, ServerConfig, DEFAULT_LOG_FILTER};
pub use error::{ApiError, ApiResponse};
pub use routes::create_router;
pub use state::AppState;

// Re-export key types for convenience
pub use auth::AuthUser;
