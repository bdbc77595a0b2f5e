//! HTTP request handlers.
//!
//! This module contains all the endpoint handlers for the server API.

pub mod auth;
pub mod health;
pub mod proxy;
pub mod ws;
