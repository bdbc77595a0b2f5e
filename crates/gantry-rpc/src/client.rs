//! The gateway client.
//!
//! One [`GatewayClient`] owns at most one live connection. A supervisor task
//! connects, performs the `connect` handshake, probes liveness on an
//! interval, and reconnects with jittered backoff when the connection dies.
//! Callers issue correlated requests with [`GatewayClient::request`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::backoff::Backoff;
use crate::config::GatewayClientConfig;
use crate::error::{Result, RpcError};
use crate::frame::{is_auth_code, response_outcome, Frame, MalformedFrame, Received, PROTOCOL_VERSION};
use crate::observer::{Notification, NotifySink, RestartHook};
use crate::pending::PendingTable;
use crate::state::{ConnectionState, SessionSnapshot, SessionStats};
use crate::transport::{Connector, WsConnector};

/// Resilient RPC client for the automation gateway.
///
/// Cloning is cheap; all clones share one connection.
#[derive(Clone)]
pub struct GatewayClient {
    inner: Arc<Inner>,
}

struct Supervisor {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct Inner {
    config: GatewayClientConfig,
    connector: Arc<dyn Connector>,
    backoff: Backoff,
    credential: RwLock<Option<String>>,
    state: watch::Sender<ConnectionState>,
    stats: Mutex<SessionStats>,
    pending: PendingTable,
    outgoing: RwLock<Option<mpsc::Sender<Frame>>>,
    next_id: AtomicU64,
    health_enabled: AtomicBool,
    restart_hook: RwLock<Option<Arc<dyn RestartHook>>>,
    notify_sink: RwLock<Option<Arc<dyn NotifySink>>>,
    supervisor: Mutex<Option<Supervisor>>,
}

/// Why a connected session ended.
enum Disconnect {
    Stopped,
    Lost(RpcError),
}

impl GatewayClient {
    /// Create a client that connects over WebSocket.
    #[must_use]
    pub fn new(config: GatewayClientConfig) -> Self {
        Self::with_connector(config, Arc::new(WsConnector))
    }

    /// Create a client with a custom transport.
    #[must_use]
    pub fn with_connector(config: GatewayClientConfig, connector: Arc<dyn Connector>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let backoff = Backoff::new(config.backoff_base(), config.backoff_cap());
        let credential = RwLock::new(config.token.clone());

        Self {
            inner: Arc::new(Inner {
                config,
                connector,
                backoff,
                credential,
                state,
                stats: Mutex::new(SessionStats::default()),
                pending: PendingTable::default(),
                outgoing: RwLock::new(None),
                next_id: AtomicU64::new(1),
                health_enabled: AtomicBool::new(true),
                restart_hook: RwLock::new(None),
                notify_sink: RwLock::new(None),
                supervisor: Mutex::new(None),
            }),
        }
    }

    /// Begin connecting in the background. Does nothing if already running.
    pub fn start(&self) {
        let mut slot = self.inner.supervisor.lock();
        if slot.as_ref().is_some_and(|s| !s.handle.is_finished()) {
            return;
        }

        tracing::info!(url = %self.inner.config.url(), "Starting gateway client");
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(supervise(Arc::clone(&self.inner), cancel.clone()));
        *slot = Some(Supervisor { cancel, handle });
    }

    /// Stop the client.
    ///
    /// Cancels the supervisor and health loop, closes the connection, and
    /// resolves every in-flight request with [`RpcError::Cancelled`].
    pub async fn stop(&self) {
        let supervisor = self.inner.supervisor.lock().take();
        if let Some(Supervisor { cancel, mut handle }) = supervisor {
            cancel.cancel();
            if tokio::time::timeout(self.inner.config.stop_grace(), &mut handle)
                .await
                .is_err()
            {
                tracing::warn!("Gateway supervisor did not stop in time, aborting");
                handle.abort();
            }
        }

        self.inner.close_connection(|| RpcError::Cancelled);
        self.inner.set_state(ConnectionState::Disconnected);
        tracing::info!("Gateway client stopped");
    }

    /// Issue a correlated call and wait for its response.
    ///
    /// # Errors
    ///
    /// - [`RpcError::Unreachable`] immediately if not connected, or if the
    ///   connection drops while waiting
    /// - [`RpcError::Timeout`] if no response arrives within `timeout`
    /// - [`RpcError::Cancelled`] if the client is stopped while waiting
    /// - [`RpcError::Remote`] if the gateway answers with an error
    pub async fn request(&self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
        if !self.is_connected() {
            return Err(RpcError::Unreachable("gateway not connected".to_string()));
        }
        self.inner.call(method, params, timeout).await
    }

    /// Whether the client is currently connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        *self.inner.state.borrow() == ConnectionState::Connected
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Snapshot of the gateway session.
    #[must_use]
    pub fn session(&self) -> SessionSnapshot {
        let stats = self.inner.stats.lock();
        SessionSnapshot {
            host: self.inner.config.host.clone(),
            port: self.inner.config.port,
            has_credential: self.inner.credential.read().is_some(),
            state: self.state(),
            last_health_check_at: stats.last_health_check_at,
            last_error: stats.last_error.clone(),
            backoff_attempt: stats.backoff_attempt,
            consecutive_failures: stats.consecutive_failures,
            in_flight: self.inner.pending.len(),
        }
    }

    /// Enable or disable periodic liveness probing.
    pub fn set_health_check_enabled(&self, enabled: bool) {
        self.inner.health_enabled.store(enabled, Ordering::SeqCst);
        tracing::debug!(enabled, "Gateway health check toggled");
    }

    /// Install the hook called on a fatal disconnect.
    pub fn set_restart_hook(&self, hook: Arc<dyn RestartHook>) {
        *self.inner.restart_hook.write() = Some(hook);
    }

    /// Install the sink that receives push notifications.
    pub fn set_notify_sink(&self, sink: Arc<dyn NotifySink>) {
        *self.inner.notify_sink.write() = Some(sink);
    }

    /// Replace the credential used for the next handshake.
    ///
    /// After a credential rejection the client stays disconnected; call this
    /// and then [`GatewayClient::start`] to try again.
    pub fn update_credential(&self, token: Option<String>) {
        *self.inner.credential.write() = token;
        tracing::info!("Gateway credential updated");
    }
}

impl Inner {
    fn set_state(&self, to: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == to {
                return false;
            }
            if !current.can_transition_to(to) {
                tracing::warn!(from = current.as_str(), to = to.as_str(), "Unexpected state transition");
            }
            tracing::info!(from = current.as_str(), to = to.as_str(), "Gateway connection state changed");
            *current = to;
            true
        });
    }

    fn record_error(&self, error: &RpcError) {
        self.stats.lock().last_error = Some(error.to_string());
    }

    /// Send a request on the current connection, bypassing the state check.
    async fn call(&self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (_guard, rx) = self.pending.register(id, method, Instant::now() + timeout);

        let outgoing = self
            .outgoing
            .read()
            .clone()
            .ok_or_else(|| RpcError::Unreachable("gateway not connected".to_string()))?;

        let exchange = async {
            outgoing
                .send(Frame::request(id, method, params))
                .await
                .map_err(|_| RpcError::Unreachable("gateway connection closed".to_string()))?;
            rx.await.unwrap_or(Err(RpcError::Cancelled))
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::debug!(id, method = %method, "Gateway request timed out");
                Err(RpcError::Timeout)
            }
        }
    }

    /// Drop the current connection and fail whatever was waiting on it.
    fn close_connection(&self, make_error: impl Fn() -> RpcError) {
        self.outgoing.write().take();
        let failed = self.pending.fail_all(make_error);
        if failed > 0 {
            tracing::debug!(failed, "Resolved in-flight requests on disconnect");
        }
    }

    /// Open a transport and complete the `connect` handshake.
    async fn establish(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        let url = self.config.url();
        let channel = tokio::time::timeout(self.config.connect_timeout(), self.connector.connect(&url))
            .await
            .map_err(|_| RpcError::Unreachable(format!("connect to {url} timed out")))??;

        *self.outgoing.write() = Some(channel.outgoing);
        let reader = tokio::spawn(receive_loop(Arc::clone(self), channel.incoming));

        let params = json!({
            "protocol": PROTOCOL_VERSION,
            "client": {
                "name": self.config.client_name,
                "version": env!("CARGO_PKG_VERSION"),
            },
            "auth": { "token": self.credential.read().clone() },
        });

        let result = self
            .call("connect", params, self.config.handshake_timeout())
            .await
            .map_err(|e| match e {
                RpcError::Remote { code, message } if is_auth_code(&code) => {
                    RpcError::AuthRejected(if message.is_empty() { code } else { message })
                }
                other => other,
            })
            .and_then(|hello| check_hello(&hello));

        if let Err(e) = result {
            reader.abort();
            self.close_connection(|| RpcError::Unreachable("handshake failed".to_string()));
            return Err(e);
        }

        Ok(reader)
    }

    /// Run health probes until the connection is lost or the client stops.
    async fn run_connected(
        &self,
        reader: &mut JoinHandle<()>,
        cancel: &CancellationToken,
    ) -> Disconnect {
        let interval = self.config.health_interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failures: u32 = 0;

        loop {
            tokio::select! {
                () = cancel.cancelled() => return Disconnect::Stopped,
                _ = &mut *reader => {
                    return Disconnect::Lost(RpcError::Unreachable(
                        "connection closed by gateway".to_string(),
                    ));
                }
                _ = ticker.tick() => {}
            }

            if !self.health_enabled.load(Ordering::SeqCst) {
                continue;
            }

            let probe = self.call(
                &self.config.probe_method,
                json!({}),
                self.config.probe_timeout(),
            );
            let outcome = tokio::select! {
                () = cancel.cancelled() => return Disconnect::Stopped,
                outcome = probe => outcome,
            };

            match outcome {
                Err(e) if e.is_connection_failure() => {
                    failures += 1;
                    {
                        let mut stats = self.stats.lock();
                        stats.consecutive_failures = failures;
                        stats.last_error = Some(e.to_string());
                    }
                    tracing::warn!(
                        failures,
                        threshold = self.config.failure_threshold,
                        error = %e,
                        "Gateway health probe failed"
                    );
                    if failures >= self.config.failure_threshold {
                        return Disconnect::Lost(e);
                    }
                }
                // Any answer, even an error, proves the connection is alive.
                _ => {
                    failures = 0;
                    let mut stats = self.stats.lock();
                    stats.consecutive_failures = 0;
                    stats.backoff_attempt = 0;
                    stats.last_health_check_at = Some(Utc::now());
                }
            }
        }
    }

    /// Fail the request a malformed response belongs to, if it can be told.
    fn reject_malformed(&self, malformed: MalformedFrame) {
        let MalformedFrame { id, reason } = malformed;
        let Some(numeric_id) = id.as_deref().and_then(|id| id.parse::<u64>().ok()) else {
            tracing::warn!(reason = %reason, "Ignoring malformed frame from gateway");
            return;
        };
        tracing::warn!(id = numeric_id, reason = %reason, "Malformed response from gateway");
        if !self.pending.resolve(numeric_id, Err(RpcError::Protocol(reason))) {
            tracing::debug!(id = numeric_id, "Malformed response for a request no longer in flight");
        }
    }

    fn fire_restart_hook(&self, error: &RpcError) {
        let hook = self.restart_hook.read().clone();
        if let Some(hook) = hook {
            hook.on_fatal_disconnect(error);
        }
    }

    fn dispatch_notification(&self, notification: Notification) {
        let sink = self.notify_sink.read().clone();
        match sink {
            Some(sink) => sink.on_notify(notification),
            None => tracing::trace!(event = %notification.event, "No notify sink installed"),
        }
    }
}

/// Validate the handshake reply.
fn check_hello(hello: &Value) -> Result<()> {
    match hello.get("protocol").and_then(Value::as_u64) {
        Some(version) if version != u64::from(PROTOCOL_VERSION) => Err(RpcError::Protocol(format!(
            "gateway speaks protocol {version}, expected {PROTOCOL_VERSION}"
        ))),
        _ => Ok(()),
    }
}

/// The connection's single receive path.
async fn receive_loop(inner: Arc<Inner>, mut incoming: mpsc::Receiver<Received>) {
    while let Some(received) = incoming.recv().await {
        let frame = match received {
            Ok(frame) => frame,
            Err(malformed) => {
                inner.reject_malformed(malformed);
                continue;
            }
        };
        match frame {
            Frame::Res {
                id,
                ok,
                payload,
                error,
            } => {
                let Ok(numeric_id) = id.parse::<u64>() else {
                    tracing::warn!(id = %id, "Response with unknown correlation ID");
                    continue;
                };
                if !inner
                    .pending
                    .resolve(numeric_id, response_outcome(ok, payload, error))
                {
                    tracing::debug!(id = %id, "Response for a request no longer in flight");
                }
            }
            Frame::Event {
                event,
                payload,
                seq,
            } => inner.dispatch_notification(Notification {
                event,
                payload,
                seq,
            }),
            Frame::Req { method, .. } => {
                tracing::warn!(method = %method, "Ignoring request initiated by gateway");
            }
        }
    }
    inner
        .pending
        .fail_all(|| RpcError::Unreachable("gateway connection closed".to_string()));
    tracing::debug!("Gateway receive loop ended");
}

/// Connection supervisor: connect, stay connected, reconnect, until cancelled.
async fn supervise(inner: Arc<Inner>, cancel: CancellationToken) {
    inner.set_state(ConnectionState::Connecting);
    let mut attempt: u32 = 0;

    loop {
        let established = tokio::select! {
            () = cancel.cancelled() => break,
            result = inner.establish() => result,
        };

        match established {
            Ok(mut reader) => {
                attempt = 0;
                {
                    let mut stats = inner.stats.lock();
                    stats.backoff_attempt = 0;
                    stats.consecutive_failures = 0;
                    stats.last_error = None;
                    stats.last_health_check_at = Some(Utc::now());
                }
                inner.set_state(ConnectionState::Connected);

                let reason = inner.run_connected(&mut reader, &cancel).await;
                reader.abort();

                match reason {
                    Disconnect::Stopped => break,
                    Disconnect::Lost(error) => {
                        tracing::warn!(error = %error, "Gateway connection lost");
                        inner.set_state(ConnectionState::Reconnecting);
                        inner.close_connection(|| {
                            RpcError::Unreachable("gateway connection lost".to_string())
                        });
                        inner.record_error(&error);
                        inner.fire_restart_hook(&error);
                    }
                }
            }
            Err(RpcError::AuthRejected(reason)) => {
                tracing::error!(reason = %reason, "Gateway rejected credentials; not retrying");
                inner.record_error(&RpcError::AuthRejected(reason));
                inner.set_state(ConnectionState::Disconnected);
                return;
            }
            Err(error) => {
                tracing::warn!(error = %error, attempt, "Gateway connection attempt failed");
                inner.record_error(&error);
                inner.set_state(ConnectionState::Reconnecting);
            }
        }

        let delay = inner.backoff.delay(attempt);
        attempt = attempt.saturating_add(1);
        inner.stats.lock().backoff_attempt = attempt;
        tracing::debug!(delay_ms = delay.as_millis(), attempt, "Waiting before reconnect");

        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
    }

    inner.close_connection(|| RpcError::Cancelled);
    inner.set_state(ConnectionState::Disconnected);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{healthy_reply, StubGateway, StubReply};
    use std::sync::atomic::AtomicUsize;

    fn client_for(stub: &StubGateway) -> GatewayClient {
        let mut config = GatewayClientConfig::new("127.0.0.1", 18789);
        config.token = Some("secret".to_string());
        GatewayClient::with_connector(config, Arc::new(stub.clone()))
    }

    async fn wait_for_state(client: &GatewayClient, want: ConnectionState) {
        let mut rx = client.watch_state();
        tokio::time::timeout(Duration::from_secs(120), rx.wait_for(|s| *s == want))
            .await
            .expect("state change timed out")
            .expect("state channel closed");
    }

    async fn connected(stub: &StubGateway) -> GatewayClient {
        let client = client_for(stub);
        client.start();
        wait_for_state(&client, ConnectionState::Connected).await;
        client
    }

    #[tokio::test(start_paused = true)]
    async fn request_fails_fast_when_disconnected() {
        let stub = StubGateway::healthy();
        let client = client_for(&stub);

        let started = Instant::now();
        let err = client
            .request("config.get", json!({}), Duration::from_secs(30))
            .await
            .unwrap_err();

        assert!(matches!(err, RpcError::Unreachable(_)));
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(stub.calls("config.get"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_carries_credential() {
        let seen = Arc::new(Mutex::new(None));
        let captured = Arc::clone(&seen);
        let stub = StubGateway::new(move |method, params| {
            if method == "connect" {
                *captured.lock() = Some(params.clone());
            }
            healthy_reply(method, params)
        });

        let client = connected(&stub).await;
        let params = seen.lock().clone().unwrap();
        assert_eq!(params["auth"]["token"], "secret");
        assert_eq!(params["protocol"], PROTOCOL_VERSION);
        assert!(client.session().has_credential);
    }

    #[tokio::test(start_paused = true)]
    async fn config_get_round_trip() {
        let stub = StubGateway::new(|method, params| match method {
            "config.get" => StubReply::Ok(json!({"agents": 2})).after(Duration::from_millis(50)),
            _ => healthy_reply(method, params),
        });
        let client = connected(&stub).await;

        let value = client
            .request("config.get", json!({}), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(value, json!({"agents": 2}));
        assert_eq!(client.session().in_flight, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_gateway_times_out() {
        let stub = StubGateway::new(|method, params| match method {
            "config.get" => StubReply::Ignore,
            _ => healthy_reply(method, params),
        });
        let client = connected(&stub).await;

        let started = Instant::now();
        let err = client
            .request("config.get", json!({}), Duration::from_secs(2))
            .await
            .unwrap_err();

        assert_eq!(err, RpcError::Timeout);
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert_eq!(client.session().in_flight, 0);
        assert!(client.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn remote_errors_pass_through() {
        let stub = StubGateway::healthy();
        let client = connected(&stub).await;

        let err = client
            .request("nope", json!({}), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Remote { ref code, .. } if code == "NOT_FOUND"));
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_response_fails_its_caller_at_once() {
        let stub = StubGateway::new(|method, params| match method {
            "config.get" => StubReply::Malformed(r#"{"ok":"maybe"}"#.to_string()),
            _ => healthy_reply(method, params),
        });
        let client = connected(&stub).await;

        let started = Instant::now();
        let err = client
            .request("config.get", json!({}), Duration::from_secs(30))
            .await
            .unwrap_err();

        assert!(matches!(err, RpcError::Protocol(_)), "{err:?}");
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(client.session().in_flight, 0);
        assert!(client.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_requests_resolve_out_of_order() {
        let stub = StubGateway::new(|method, params| match method {
            "echo" => {
                let n = params["n"].as_u64().unwrap_or(0);
                StubReply::Ok(params.clone()).after(Duration::from_millis((20 - n) * 10))
            }
            _ => healthy_reply(method, params),
        });
        let client = connected(&stub).await;

        let calls = (0..20u64).map(|n| {
            let client = client.clone();
            async move {
                client
                    .request("echo", json!({ "n": n }), Duration::from_secs(5))
                    .await
            }
        });
        let results = futures::future::join_all(calls).await;

        for (n, result) in results.into_iter().enumerate() {
            assert_eq!(result.unwrap()["n"], n as u64);
        }
        assert_eq!(client.session().in_flight, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_in_flight_requests() {
        let stub = StubGateway::new(|method, params| match method {
            "slow" => StubReply::Ignore,
            _ => healthy_reply(method, params),
        });
        let client = connected(&stub).await;

        let waiting = {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .request("slow", json!({}), Duration::from_secs(60))
                    .await
            })
        };
        while client.session().in_flight == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        client.stop().await;

        assert_eq!(waiting.await.unwrap(), Err(RpcError::Cancelled));
        assert_eq!(client.session().in_flight, 0);
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_failures_trigger_reconnect() {
        let stub = StubGateway::healthy();
        let client = connected(&stub).await;

        let restarts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&restarts);
        client.set_restart_hook(Arc::new(move |_: &RpcError| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        stub.set_handler(|method, params| match method {
            "health" => StubReply::Ignore,
            _ => healthy_reply(method, params),
        });
        wait_for_state(&client, ConnectionState::Reconnecting).await;

        assert_eq!(stub.calls("health"), 3);
        assert_eq!(restarts.load(Ordering::SeqCst), 1);
        assert!(client.session().last_error.is_some());

        stub.set_healthy();
        wait_for_state(&client, ConnectionState::Connected).await;

        let session = client.session();
        assert_eq!(session.backoff_attempt, 0);
        assert_eq!(session.consecutive_failures, 0);
        assert_eq!(stub.connect_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_errors_still_count_as_alive() {
        let stub = StubGateway::new(|method, params| match method {
            "health" => StubReply::error("DEGRADED", "busy"),
            _ => healthy_reply(method, params),
        });
        let client = connected(&stub).await;

        tokio::time::sleep(Duration::from_secs(100)).await;

        assert!(client.is_connected());
        assert!(stub.calls("health") >= 5);
        assert_eq!(client.session().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_health_check_sends_no_probes() {
        let stub = StubGateway::healthy();
        let client = client_for(&stub);
        client.set_health_check_enabled(false);
        client.start();
        wait_for_state(&client, ConnectionState::Connected).await;

        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(stub.calls("health"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_link_reconnects() {
        let stub = StubGateway::healthy();
        let client = connected(&stub).await;

        stub.drop_connections();
        wait_for_state(&client, ConnectionState::Reconnecting).await;
        wait_for_state(&client, ConnectionState::Connected).await;

        assert_eq!(stub.connect_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_connections_back_off_until_gateway_returns() {
        let stub = StubGateway::healthy();
        stub.set_refusing(true);
        let client = client_for(&stub);
        client.start();

        wait_for_state(&client, ConnectionState::Reconnecting).await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(client.session().backoff_attempt >= 1);
        assert_eq!(stub.connect_count(), 0);

        stub.set_refusing(false);
        wait_for_state(&client, ConnectionState::Connected).await;
        assert_eq!(client.session().backoff_attempt, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_credential_is_not_retried() {
        let stub = StubGateway::new(|method, params| match method {
            "connect" => StubReply::error("AUTH_REJECTED", "bad token"),
            _ => healthy_reply(method, params),
        });
        let client = client_for(&stub);
        client.start();

        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(stub.connect_count(), 1);
        let last_error = client.session().last_error.unwrap();
        assert!(last_error.contains("bad token"), "{last_error}");

        stub.set_healthy();
        client.update_credential(Some("fresh".to_string()));
        client.start();
        wait_for_state(&client, ConnectionState::Connected).await;
    }

    #[tokio::test(start_paused = true)]
    async fn notifications_reach_the_sink() {
        let stub = StubGateway::healthy();
        let client = client_for(&stub);

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        client.set_notify_sink(Arc::new(move |n: Notification| sink.lock().push(n)));
        client.start();
        wait_for_state(&client, ConnectionState::Connected).await;

        stub.push_event("agent.status", json!({"agent": "a1", "status": "idle"}));
        tokio::time::sleep(Duration::from_millis(10)).await;

        let received = received.lock();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].event, "agent.status");
        assert_eq!(received[0].payload["agent"], "a1");
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent() {
        let stub = StubGateway::healthy();
        let client = connected(&stub).await;
        client.start();
        client.start();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(stub.connect_count(), 1);
        assert!(client.is_connected());
    }
}
