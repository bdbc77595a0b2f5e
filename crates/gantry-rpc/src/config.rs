//! Gateway client configuration.

use std::fmt;
use std::time::Duration;

use serde::Deserialize;

/// Configuration for the gateway connection.
#[derive(Clone, Deserialize)]
pub struct GatewayClientConfig {
    /// Gateway host name or IP.
    #[serde(default = "GatewayClientConfig::default_host")]
    pub host: String,

    /// Gateway port.
    #[serde(default = "GatewayClientConfig::default_port")]
    pub port: u16,

    /// Use `wss://` instead of `ws://`.
    #[serde(default)]
    pub tls: bool,

    /// Credential token presented in the `connect` handshake.
    #[serde(default)]
    pub token: Option<String>,

    /// Name announced to the gateway.
    #[serde(default = "GatewayClientConfig::default_client_name")]
    pub client_name: String,

    /// Seconds to wait for the transport to connect.
    #[serde(default = "GatewayClientConfig::default_connect_timeout")]
    pub connect_timeout_seconds: u64,

    /// Seconds to wait for the `connect` handshake response.
    #[serde(default = "GatewayClientConfig::default_handshake_timeout")]
    pub handshake_timeout_seconds: u64,

    /// Seconds between liveness probes.
    #[serde(default = "GatewayClientConfig::default_health_interval")]
    pub health_interval_seconds: u64,

    /// Seconds a liveness probe may take.
    #[serde(default = "GatewayClientConfig::default_probe_timeout")]
    pub probe_timeout_seconds: u64,

    /// Method used as the liveness probe.
    #[serde(default = "GatewayClientConfig::default_probe_method")]
    pub probe_method: String,

    /// Consecutive probe failures before the connection is abandoned.
    #[serde(default = "GatewayClientConfig::default_failure_threshold")]
    pub failure_threshold: u32,

    /// Base reconnect delay in milliseconds.
    #[serde(default = "GatewayClientConfig::default_backoff_base")]
    pub backoff_base_ms: u64,

    /// Reconnect delay cap in milliseconds.
    #[serde(default = "GatewayClientConfig::default_backoff_cap")]
    pub backoff_cap_ms: u64,

    /// Seconds `stop()` waits for the supervisor before aborting it.
    #[serde(default = "GatewayClientConfig::default_stop_grace")]
    pub stop_grace_seconds: u64,
}

impl GatewayClientConfig {
    fn default_host() -> String {
        "127.0.0.1".to_string()
    }

    const fn default_port() -> u16 {
        18789
    }

    fn default_client_name() -> String {
        format!("gantry/{}", env!("CARGO_PKG_VERSION"))
    }

    const fn default_connect_timeout() -> u64 {
        10
    }

    const fn default_handshake_timeout() -> u64 {
        10
    }

    const fn default_health_interval() -> u64 {
        15
    }

    const fn default_probe_timeout() -> u64 {
        5
    }

    fn default_probe_method() -> String {
        "health".to_string()
    }

    const fn default_failure_threshold() -> u32 {
        3
    }

    const fn default_backoff_base() -> u64 {
        500
    }

    const fn default_backoff_cap() -> u64 {
        30_000
    }

    const fn default_stop_grace() -> u64 {
        5
    }

    /// Build a config for `host:port` with defaults for everything else.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// WebSocket URL of the gateway.
    #[must_use]
    pub fn url(&self) -> String {
        let scheme = if self.tls { "wss" } else { "ws" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }

    /// Get the connect timeout as a `Duration`.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    /// Get the handshake timeout as a `Duration`.
    #[must_use]
    pub const fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_seconds)
    }

    /// Get the probe interval as a `Duration`.
    #[must_use]
    pub const fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_seconds)
    }

    /// Get the probe timeout as a `Duration`.
    #[must_use]
    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_seconds)
    }

    /// Get the base reconnect delay as a `Duration`.
    #[must_use]
    pub const fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    /// Get the reconnect delay cap as a `Duration`.
    #[must_use]
    pub const fn backoff_cap(&self) -> Duration {
        Duration::from_millis(self.backoff_cap_ms)
    }

    /// Get the stop grace period as a `Duration`.
    #[must_use]
    pub const fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_seconds)
    }
}

impl Default for GatewayClientConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
            tls: false,
            token: None,
            client_name: Self::default_client_name(),
            connect_timeout_seconds: Self::default_connect_timeout(),
            handshake_timeout_seconds: Self::default_handshake_timeout(),
            health_interval_seconds: Self::default_health_interval(),
            probe_timeout_seconds: Self::default_probe_timeout(),
            probe_method: Self::default_probe_method(),
            failure_threshold: Self::default_failure_threshold(),
            backoff_base_ms: Self::default_backoff_base(),
            backoff_cap_ms: Self::default_backoff_cap(),
            stop_grace_seconds: Self::default_stop_grace(),
        }
    }
}

impl fmt::Debug for GatewayClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayClientConfig")
            .field("url", &self.url())
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("health_interval_seconds", &self.health_interval_seconds)
            .field("probe_timeout_seconds", &self.probe_timeout_seconds)
            .field("failure_threshold", &self.failure_threshold)
            .field("backoff_base_ms", &self.backoff_base_ms)
            .field("backoff_cap_ms", &self.backoff_cap_ms)
            .finish_non_exhaustive()
    }
}
