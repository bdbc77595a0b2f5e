//! Resilient RPC client for the gantry automation gateway.
//!
//! The gateway speaks JSON frames over a single WebSocket. This crate keeps
//! that connection alive and turns it into plain `async` calls.
//!
//! # Architecture
//!
//! ```text
//!   request() ──▶ PendingTable ◀── receive loop ◀── incoming frames
//!       │              ▲                 │
//!       ▼              │                 └──▶ NotifySink (events)
//!   outgoing frames    │
//!       │         fail_all on disconnect / stop
//!       ▼
//! ┌───────────┐   connect + handshake   ┌──────────────────────┐
//! │ Connector │ ◀────────────────────── │      supervisor      │
//! │ (ws/stub) │                         │ probe · backoff · K  │
//! └───────────┘                         └──────────────────────┘
//!                                              │
//!                                              └──▶ RestartHook
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::time::Duration;
//! use gantry_rpc::{GatewayClient, GatewayClientConfig};
//!
//! # async fn example() -> Result<(), gantry_rpc::RpcError> {
//! let client = GatewayClient::new(GatewayClientConfig::new("127.0.0.1", 18789));
//! client.start();
//!
//! let config = client
//!     .request("config.get", serde_json::json!({}), Duration::from_secs(10))
//!     .await?;
//! println!("{config}");
//!
//! client.stop().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod backoff;
pub mod client;
pub mod config;
pub mod error;
pub mod frame;
pub mod observer;
mod pending;
pub mod state;
pub mod transport;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use backoff::Backoff;
pub use client::GatewayClient;
pub use config::GatewayClientConfig;
pub use error::{Result, RpcError};
pub use frame::{Frame, FrameError, MalformedFrame, Received, PROTOCOL_VERSION};
pub use observer::{Notification, NotifySink, RestartHook};
pub use state::{ConnectionState, SessionSnapshot};
pub use transport::{Channel, Connector, WsConnector};
