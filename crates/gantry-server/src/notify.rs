//! Routes gateway push events, gateway state changes and server-originated
//! events into hub broadcasts.

use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use gantry_rpc::{GatewayClient, Notification, NotifySink};

use crate::hub::{HubEvent, HubHandle};

/// Forwards gateway notifications to the hub as `gateway.<event>`.
///
/// Runs on the gateway client's receive path, so it only enqueues.
pub struct HubNotifier {
    hub: HubHandle,
}

impl HubNotifier {
    /// Create a notifier publishing to `hub`.
    #[must_use]
    pub fn new(hub: HubHandle) -> Self {
        Self { hub }
    }
}

impl NotifySink for HubNotifier {
    fn on_notify(&self, notification: Notification) {
        let kind = format!("gateway.{}", notification.event);
        let mut payload = notification.payload;
        if let (Some(seq), Value::Object(map)) = (notification.seq, &mut payload) {
            map.entry("seq").or_insert_with(|| Value::from(seq));
        }
        if !self.hub.broadcast(&HubEvent::new(kind, payload)) {
            tracing::debug!(event = %notification.event, "Gateway notification dropped");
        }
    }
}

/// Broadcast `gateway.state` on every connection state change until `cancel`
/// fires or the client is dropped.
pub fn spawn_state_forwarder(
    gateway: GatewayClient,
    hub: HubHandle,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let mut states = gateway.watch_state();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                changed = states.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            let state = *states.borrow_and_update();
            hub.broadcast(&HubEvent::new(
                "gateway.state",
                json!({ "state": state, "session": gateway.session() }),
            ));
        }
        tracing::debug!("Gateway state forwarder stopped");
    })
}

/// Events originating inside the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InternalEvent {
    /// A user logged in.
    Login {
        /// Username.
        username: String,
    },
    /// A user logged out.
    Logout {
        /// Username.
        username: String,
    },
    /// The initial administrator was created.
    SetupCompleted {
        /// Administrator username.
        username: String,
    },
}

impl InternalEvent {
    /// Hub event type.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Login { .. } => "auth.login",
            Self::Logout { .. } => "auth.logout",
            Self::SetupCompleted { .. } => "auth.setup",
        }
    }

    fn payload(&self) -> Value {
        match self {
            Self::Login { username } | Self::Logout { username } | Self::SetupCompleted { username } => {
                json!({ "username": username })
            }
        }
    }
}

/// Broadcast a server-originated event.
pub fn publish_internal(hub: &HubHandle, event: &InternalEvent) {
    hub.broadcast(&HubEvent::new(event.kind(), event.payload()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use gantry_auth::MockSessionValidator;
    use gantry_rpc::testing::StubGateway;
    use gantry_rpc::{ConnectionState, GatewayClientConfig};

    use crate::config::HubConfig;
    use crate::hub::{self, ClientHello, Registration};

    async fn hub_with_listener() -> (HubHandle, Registration, CancellationToken) {
        let (hub, handle) = hub::channel(
            &HubConfig::default(),
            vec!["https://ui".to_string()],
            Arc::new(MockSessionValidator),
        );
        let cancel = CancellationToken::new();
        tokio::spawn(hub.run(cancel.clone()));

        let mut reg = handle
            .register(ClientHello {
                origin: Some("https://ui".to_string()),
                host: None,
                token: Some("test-token:watcher".to_string()),
            })
            .await
            .unwrap();
        reg.messages.recv().await.unwrap(); // greeting
        (handle, reg, cancel)
    }

    async fn next_event(reg: &mut Registration) -> Value {
        let message = tokio::time::timeout(Duration::from_secs(5), reg.messages.recv())
            .await
            .expect("no event")
            .expect("queue closed");
        serde_json::from_str(&message).unwrap()
    }

    #[tokio::test]
    async fn notifications_become_gateway_events() {
        let (hub, mut reg, _cancel) = hub_with_listener().await;
        let notifier = HubNotifier::new(hub);

        notifier.on_notify(Notification {
            event: "agent.status".to_string(),
            payload: json!({ "agent": "a1" }),
            seq: Some(7),
        });

        let event = next_event(&mut reg).await;
        assert_eq!(event["type"], "gateway.agent.status");
        assert_eq!(event["payload"]["agent"], "a1");
        assert_eq!(event["payload"]["seq"], 7);
    }

    #[tokio::test]
    async fn internal_events_are_published() {
        let (hub, mut reg, _cancel) = hub_with_listener().await;
        publish_internal(
            &hub,
            &InternalEvent::Login {
                username: "admin".to_string(),
            },
        );

        let event = next_event(&mut reg).await;
        assert_eq!(event["type"], "auth.login");
        assert_eq!(event["payload"]["username"], "admin");
    }

    #[tokio::test]
    async fn state_changes_are_forwarded() {
        let (hub, mut reg, cancel) = hub_with_listener().await;
        let stub = StubGateway::healthy();
        let client = gantry_rpc::GatewayClient::with_connector(
            GatewayClientConfig::new("127.0.0.1", 18789),
            Arc::new(stub),
        );
        let forwarder = spawn_state_forwarder(client.clone(), hub, cancel.clone());

        client.start();
        let mut seen = Vec::new();
        while seen.last().map(String::as_str) != Some("connected") {
            let event = next_event(&mut reg).await;
            assert_eq!(event["type"], "gateway.state");
            seen.push(event["payload"]["state"].as_str().unwrap().to_string());
        }
        assert_eq!(client.state(), ConnectionState::Connected);

        client.stop().await;
        cancel.cancel();
        forwarder.await.unwrap();
    }
}
