//! Composition root.
//!
//! [`App`] builds every long-lived service exactly once and hands out cheap
//! handles through [`AppState`]. Nothing in the crate reaches for a global.
//!
//! ```text
//!             ┌──────────────── App ────────────────┐
//!             │  GatewayClient ──notify──▶ HubNotifier ──▶ Hub
//!             │       └──watch_state──▶ state forwarder ──▶ Hub
//!             │  RateLimiter ◀── janitor                   │
//!             │  root CancellationToken ──▶ every task      │
//!             └─────────────────────────────────────────────┘
//! ```

use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use gantry_auth::{AccountDirectory, AuditSink, SessionSigner, SessionValidator};
use gantry_rpc::GatewayClient;

use crate::config::ServerConfig;
use crate::hub::{self, Hub};
use crate::notify::{spawn_state_forwarder, HubNotifier};
use crate::rate_limit::RateLimiter;
use crate::routes::create_router;
use crate::state::AppState;

/// The assembled server.
pub struct App {
    state: AppState,
    hub: Option<Hub>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl App {
    /// Wire the services together. Nothing runs until [`App::start`].
    #[must_use]
    pub fn new(
        config: ServerConfig,
        gateway: GatewayClient,
        signer: SessionSigner,
        accounts: Arc<dyn AccountDirectory>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let signer = Arc::new(signer);
        let validator: Arc<dyn SessionValidator> = signer.clone();
        let (hub, hub_handle) =
            hub::channel(&config.hub, config.cors_origins.clone(), Arc::clone(&validator));
        gateway.set_notify_sink(Arc::new(HubNotifier::new(hub_handle.clone())));

        let cancel = CancellationToken::new();
        let state = AppState {
            limiter: Arc::new(RateLimiter::from_config(&config.rate_limit)),
            config: Arc::new(config),
            gateway,
            hub: hub_handle,
            signer,
            validator,
            accounts,
            audit,
            shutdown: cancel.clone(),
        };

        Self {
            state,
            hub: Some(hub),
            cancel,
            tasks: Vec::new(),
        }
    }

    /// Shared state handed to handlers.
    #[must_use]
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// The root cancellation token.
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Build the router over this app's state.
    #[must_use]
    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    /// Spawn the hub coordinator, the rate-limit janitor and the gateway
    /// state forwarder, then start the gateway client. Calling it again does
    /// nothing.
    pub fn start(&mut self) {
        let Some(hub) = self.hub.take() else {
            return;
        };
        self.tasks.push(tokio::spawn(hub.run(self.cancel.child_token())));
        self.tasks
            .push(self.state.limiter.spawn_janitor(self.cancel.child_token()));
        self.tasks.push(spawn_state_forwarder(
            self.state.gateway.clone(),
            self.state.hub.clone(),
            self.cancel.child_token(),
        ));
        self.state.gateway.start();
        tracing::info!(tasks = self.tasks.len(), "Background tasks started");
    }

    /// Serve on `listener` until `signal` resolves, then shut down.
    ///
    /// Once the signal fires, background tasks are cancelled (closing every
    /// realtime connection and stream) and in-flight requests get the
    /// configured grace period before the server stops waiting for them.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails while accepting connections.
    pub async fn serve<F>(mut self, listener: TcpListener, signal: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.start();
        let grace = self.state.config.shutdown_grace();

        let cancel = self.cancel.clone();
        let shutdown = async move {
            signal.await;
            tracing::info!("Shutdown signal received, draining connections");
            cancel.cancel();
        };

        let server = axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .into_future();

        let cancel = self.cancel.clone();
        let result = tokio::select! {
            result = server => result,
            () = async move {
                cancel.cancelled().await;
                tokio::time::sleep(grace).await;
            } => {
                tracing::warn!(grace_seconds = grace.as_secs(), "Grace period elapsed, abandoning open connections");
                Ok(())
            }
        };

        self.shutdown().await;
        result
    }

    /// Cancel background tasks, stop the gateway client and wait for the
    /// tasks, aborting any that outlive the grace period.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.state.gateway.stop().await;

        let grace = self.state.config.shutdown_grace();
        for task in self.tasks {
            let abort = task.abort_handle();
            if tokio::time::timeout(grace, task).await.is_err() {
                tracing::warn!("Background task did not stop in time, aborting");
                abort.abort();
            }
        }
        tracing::info!("Shutdown complete");
    }
}
