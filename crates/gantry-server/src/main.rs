//! Gantry admin server.
//!
//! Configuration comes from environment variables:
//!
//! | Variable                 | Default          |
//! |--------------------------|------------------|
//! | `LISTEN_ADDR`            | `0.0.0.0:8080`   |
//! | `GATEWAY_HOST`           | `127.0.0.1`      |
//! | `GATEWAY_PORT`           | `18789`          |
//! | `GATEWAY_TOKEN`          | unset            |
//! | `SESSION_SECRET`         | random per run   |
//! | `CORS_ORIGINS`           | empty (deny all) |
//! | `MAX_BODY_BYTES`         | `2097152`        |
//! | `RATE_LIMIT_CAPACITY`    | `10`             |
//! | `RATE_LIMIT_WINDOW_SECS` | `60`             |
//! | `ADMIN_USERNAME`         | unset            |
//! | `ADMIN_PASSWORD`         | unset            |
//! | `LOG_FORMAT`             | `text` (`json`)  |
//!
//! Without `ADMIN_USERNAME`/`ADMIN_PASSWORD` the first visitor creates the
//! administrator through `/api/auth/setup`.

use std::str::FromStr;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gantry_auth::{AccountDirectory, AuthConfig, InMemoryAccounts, SessionSigner, TracingAuditSink};
use gantry_rpc::{GatewayClient, GatewayClientConfig};
use gantry_server::{App, ServerConfig, DEFAULT_LOG_FILTER};

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T>(name: &str) -> Result<Option<T>, Box<dyn std::error::Error>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_opt(name)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| -> Box<dyn std::error::Error> {
                    format!("invalid {name}={raw}: {e}").into()
                })
        })
        .transpose()
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);

    if env_opt("LOG_FORMAT").is_some_and(|f| f.eq_ignore_ascii_case("json")) {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn server_config() -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let mut config = ServerConfig::default();
    if let Some(addr) = env_opt("LISTEN_ADDR") {
        config.listen_addr = addr;
    }
    if let Some(origins) = env_opt("CORS_ORIGINS") {
        config.cors_origins = origins
            .split(',')
            .map(|o| o.trim().trim_end_matches('/').to_string())
            .filter(|o| !o.is_empty())
            .collect();
    }
    if let Some(max) = env_parse("MAX_BODY_BYTES")? {
        config.max_body_bytes = max;
    }
    if let Some(capacity) = env_parse("RATE_LIMIT_CAPACITY")? {
        config.rate_limit.capacity = capacity;
    }
    if let Some(window) = env_parse("RATE_LIMIT_WINDOW_SECS")? {
        config.rate_limit.window_seconds = window;
    }
    Ok(config)
}

fn gateway_config() -> Result<GatewayClientConfig, Box<dyn std::error::Error>> {
    let mut config = GatewayClientConfig::default();
    if let Some(host) = env_opt("GATEWAY_HOST") {
        config.host = host;
    }
    if let Some(port) = env_parse("GATEWAY_PORT")? {
        config.port = port;
    }
    config.token = env_opt("GATEWAY_TOKEN");
    Ok(config)
}

fn auth_config() -> Result<AuthConfig, Box<dyn std::error::Error>> {
    let session_secret = env_opt("SESSION_SECRET").unwrap_or_else(|| {
        tracing::warn!("No SESSION_SECRET set - sessions will not survive a restart");
        hex::encode(rand::random::<[u8; 32]>())
    });
    let config = AuthConfig {
        session_secret,
        ..AuthConfig::default()
    };
    config.validate()?;
    Ok(config)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Ctrl+C received, shutting down"),
        () = terminate => tracing::info!("SIGTERM received, shutting down"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting gantry");

    let config = server_config()?;
    let gateway_config = gateway_config()?;
    let auth_config = auth_config()?;

    tracing::info!(
        listen_addr = %config.listen_addr,
        gateway = %gateway_config.url(),
        gateway_token = gateway_config.token.is_some(),
        cors_origins = ?config.cors_origins,
        max_body_bytes = config.max_body_bytes,
        rate_limit_capacity = config.rate_limit.capacity,
        rate_limit_window_seconds = config.rate_limit.window_seconds,
        "Configuration loaded"
    );

    let accounts: Arc<dyn AccountDirectory> =
        match (env_opt("ADMIN_USERNAME"), env_opt("ADMIN_PASSWORD")) {
            (Some(username), Some(password)) => {
                tracing::info!(username = %username, "Administrator seeded from environment");
                Arc::new(InMemoryAccounts::with_admin(&username, &password))
            }
            _ => {
                tracing::warn!("No administrator configured - first visitor must complete setup");
                Arc::new(InMemoryAccounts::new())
            }
        };

    let listen_addr = config.listen_addr.clone();
    let app = App::new(
        config,
        GatewayClient::new(gateway_config),
        SessionSigner::new(auth_config),
        accounts,
        Arc::new(TracingAuditSink),
    );

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(listen_addr = %listen_addr, "HTTP server listening");
    app.serve(listener, shutdown_signal()).await?;

    Ok(())
}
