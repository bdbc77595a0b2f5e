//! The admission pipeline.
//!
//! Stages run in this order, each wrapping everything below it:
//!
//! ```text
//! Recovery ─▶ SecurityHeaders ─▶ RequestID ─▶ RequestLog ─▶ CORS
//!     ─▶ MaxBodySize ─▶ RateLimit ─▶ InputSanitize ─▶ Auth ─▶ handler
//! ```
//!
//! Recovery is `tower_http::catch_panic` with [`recovery::panic_response`];
//! RequestLog is `tower_http::trace::TraceLayer`. The rest are
//! `axum::middleware::from_fn` stages defined here. Any stage may answer on
//! its own with an error envelope, in which case nothing below it runs.

pub mod auth;
pub mod body_limit;
pub mod cors;
pub mod rate_limit;
pub mod recovery;
pub mod request_id;
pub mod sanitize;
pub mod security_headers;

pub use auth::require_session;
pub use body_limit::limit_body;
pub use cors::cors;
pub use rate_limit::rate_limit;
pub use recovery::panic_response;
pub use request_id::assign_request_id;
pub use sanitize::sanitize_input;
pub use security_headers::security_headers;
