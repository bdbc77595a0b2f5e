//! Server configuration types.
//!
//! This module defines configuration structures for the HTTP/WebSocket server.

use std::time::Duration;

use serde::Deserialize;

/// Log filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info,gantry=debug";

/// Configuration for the server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Listen address (e.g., "0.0.0.0:8080").
    #[serde(default = "ServerConfig::default_listen_addr")]
    pub listen_addr: String,

    /// Allowed browser origins. Empty means every cross-origin request is refused.
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    #[serde(default = "ServerConfig::default_max_body")]
    pub max_body_bytes: usize,

    /// Paths that do not require a session.
    #[serde(default = "ServerConfig::default_auth_skip_paths")]
    pub auth_skip_paths: Vec<String>,

    /// Use the left-most `X-Forwarded-For` address as the client IP.
    ///
    /// Only enable this behind a proxy that overwrites the header.
    #[serde(default)]
    pub trust_forwarded_for: bool,

    /// Default timeout for proxied gateway calls, in seconds.
    #[serde(default = "ServerConfig::default_request_timeout")]
    pub request_timeout_seconds: u64,

    /// Interval between SSE heartbeats, in seconds.
    #[serde(default = "ServerConfig::default_stream_heartbeat")]
    pub stream_heartbeat_seconds: u64,

    /// Time allowed for in-flight work after a shutdown signal, in seconds.
    #[serde(default = "ServerConfig::default_shutdown_grace")]
    pub shutdown_grace_seconds: u64,

    /// Rate limiting for sensitive paths.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Realtime hub settings.
    #[serde(default)]
    pub hub: HubConfig,
}

impl ServerConfig {
    fn default_listen_addr() -> String {
        "0.0.0.0:8080".to_string()
    }

    const fn default_max_body() -> usize {
        2 * 1024 * 1024 // 2 MiB
    }

    fn default_auth_skip_paths() -> Vec<String> {
        [
            "/health",
            "/api/health",
            "/api/auth/login",
            "/api/auth/setup",
            "/api/auth/status",
            "/ws",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }

    const fn default_request_timeout() -> u64 {
        30
    }

    const fn default_stream_heartbeat() -> u64 {
        5
    }

    const fn default_shutdown_grace() -> u64 {
        10
    }

    /// Get the proxied call timeout as a `Duration`.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Get the SSE heartbeat interval as a `Duration`.
    #[must_use]
    pub const fn stream_heartbeat(&self) -> Duration {
        Duration::from_secs(self.stream_heartbeat_seconds)
    }

    /// Get the shutdown grace period as a `Duration`.
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }

    /// Whether `origin` is on the allow-list. Comparison is exact.
    #[must_use]
    pub fn origin_allowed(&self, origin: &str) -> bool {
        self.cors_origins.iter().any(|allowed| allowed == origin)
    }

    /// Whether `path` bypasses session authentication.
    #[must_use]
    pub fn skips_auth(&self, path: &str) -> bool {
        self.auth_skip_paths.iter().any(|skip| skip == path)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: Self::default_listen_addr(),
            cors_origins: Vec::new(),
            max_body_bytes: Self::default_max_body(),
            auth_skip_paths: Self::default_auth_skip_paths(),
            trust_forwarded_for: false,
            request_timeout_seconds: Self::default_request_timeout(),
            stream_heartbeat_seconds: Self::default_stream_heartbeat(),
            shutdown_grace_seconds: Self::default_shutdown_grace(),
            rate_limit: RateLimitConfig::default(),
            hub: HubConfig::default(),
        }
    }
}

/// Fixed-window rate limit applied to a set of paths.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Requests allowed per key per window.
    #[serde(default = "RateLimitConfig::default_capacity")]
    pub capacity: u32,

    /// Window length in seconds.
    #[serde(default = "RateLimitConfig::default_window")]
    pub window_seconds: u64,

    /// Buckets idle for this many windows are evicted.
    #[serde(default = "RateLimitConfig::default_idle_multiplier")]
    pub idle_multiplier: u32,

    /// Paths the limit applies to.
    #[serde(default = "RateLimitConfig::default_paths")]
    pub paths: Vec<String>,
}

impl RateLimitConfig {
    const fn default_capacity() -> u32 {
        10
    }

    const fn default_window() -> u64 {
        60
    }

    const fn default_idle_multiplier() -> u32 {
        3
    }

    fn default_paths() -> Vec<String> {
        vec!["/api/auth/login".to_string(), "/api/auth/setup".to_string()]
    }

    /// Get the window as a `Duration`.
    #[must_use]
    pub const fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }

    /// Whether requests to `path` are rate limited.
    #[must_use]
    pub fn applies_to(&self, path: &str) -> bool {
        self.paths.iter().any(|p| p == path)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: Self::default_capacity(),
            window_seconds: Self::default_window(),
            idle_multiplier: Self::default_idle_multiplier(),
            paths: Self::default_paths(),
        }
    }
}

/// Realtime hub settings.
#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    /// Messages buffered per connection before it is evicted.
    #[serde(default = "HubConfig::default_queue_capacity")]
    pub queue_capacity: usize,

    /// Commands buffered for the coordinator loop.
    #[serde(default = "HubConfig::default_command_capacity")]
    pub command_capacity: usize,
}

impl HubConfig {
    const fn default_queue_capacity() -> usize {
        64
    }

    const fn default_command_capacity() -> usize {
        1024
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: Self::default_queue_capacity(),
            command_capacity: Self::default_command_capacity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.listen_addr, "0.0.0.0:8080");
        assert!(config.cors_origins.is_empty());
        assert_eq!(config.max_body_bytes, 2 * 1024 * 1024);
        assert_eq!(config.rate_limit.capacity, 10);
        assert_eq!(config.rate_limit.window(), Duration::from_secs(60));
        assert_eq!(config.hub.queue_capacity, 64);
    }

    #[test]
    fn skip_list_is_exact() {
        let config = ServerConfig::default();
        assert!(config.skips_auth("/health"));
        assert!(config.skips_auth("/ws"));
        assert!(!config.skips_auth("/api/gateway/status"));
        assert!(!config.skips_auth("/health/extra"));
    }

    #[test]
    fn origin_allow_list() {
        let config = ServerConfig {
            cors_origins: vec!["https://admin.example.com".to_string()],
            ..ServerConfig::default()
        };
        assert!(config.origin_allowed("https://admin.example.com"));
        assert!(!config.origin_allowed("https://evil.example.com"));
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config: ServerConfig =
            serde_json::from_str(r#"{"rate_limit": {"capacity": 3}}"#).unwrap();
        assert_eq!(config.rate_limit.capacity, 3);
        assert_eq!(config.rate_limit.window_seconds, 60);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }
}
