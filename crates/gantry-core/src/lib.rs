//! Core types and utilities for gantry.
//!
//! This crate provides the foundational types used throughout the gantry
//! control plane:
//!
//! - **Identifiers**: Strongly-typed IDs for users, realtime connections, and requests
//!
//! # Example
//!
//! ```
//! use gantry_core::{ConnectionId, RequestId, UserId};
//!
//! let user_id = UserId::for_username("admin");
//! let connection_id = ConnectionId::generate();
//! let request_id: RequestId = "trace-42".parse().unwrap();
//! # let _ = (user_id, connection_id, request_id);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod ids;

pub use ids::{ConnectionId, IdError, RequestId, UserId, MAX_REQUEST_ID_LEN};
