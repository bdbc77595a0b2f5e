//! Realtime broadcast hub.
//!
//! One coordinator task owns the registry of live browser connections. All
//! mutation goes through its command channel, so there is no shared map to
//! race on.
//!
//! ```text
//!  ws handler ──register──▶ ┌─────────────┐ ──try_send──▶ queue ─▶ writer ─▶ socket
//!  ws reader ─unregister──▶ │ coordinator │ ──try_send──▶ queue ─▶ writer ─▶ socket
//!  notify glue ─broadcast─▶ └─────────────┘ ──full?──▶ evict
//! ```
//!
//! Each connection has a bounded queue. A broadcast never waits on a
//! consumer: a full queue evicts that connection instead.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use gantry_auth::SessionValidator;
use gantry_core::ConnectionId;

use crate::config::HubConfig;

/// An event to push to every connection.
#[derive(Debug, Clone, PartialEq)]
pub struct HubEvent {
    /// Event type, e.g. `gateway.state`.
    pub kind: String,
    /// Event body.
    pub payload: Value,
}

impl HubEvent {
    /// Build an event.
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    /// Serialize as the `{type, payload, timestamp}` wire envelope.
    #[must_use]
    pub fn to_wire(&self) -> Arc<str> {
        #[derive(Serialize)]
        struct Wire<'a> {
            #[serde(rename = "type")]
            kind: &'a str,
            payload: &'a Value,
            timestamp: DateTime<Utc>,
        }

        let wire = Wire {
            kind: &self.kind,
            payload: &self.payload,
            timestamp: Utc::now(),
        };
        // Serializing a map of strings and JSON values cannot fail.
        serde_json::to_string(&wire).unwrap_or_default().into()
    }
}

/// Why a connection was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HubRejection {
    /// No `Origin` header was sent.
    #[error("origin required")]
    MissingOrigin,
    /// The origin is not on the allow-list.
    #[error("origin not allowed: {0}")]
    OriginNotAllowed(String),
    /// No session credential was presented.
    #[error("authentication required")]
    MissingCredential,
    /// The credential did not validate.
    #[error("invalid session")]
    InvalidCredential,
    /// The hub is shutting down.
    #[error("server shutting down")]
    ShuttingDown,
}

/// What a connecting client presented.
#[derive(Debug, Clone, Default)]
pub struct ClientHello {
    /// `Origin` header.
    pub origin: Option<String>,
    /// `Host` header, for same-origin checks.
    pub host: Option<String>,
    /// Session token from the cookie or query string.
    pub token: Option<String>,
}

/// A registered connection: its ID and the queue its writer drains.
#[derive(Debug)]
pub struct Registration {
    /// Connection ID.
    pub id: ConnectionId,
    /// Authenticated username.
    pub username: String,
    /// Serialized events for this connection. Yields `None` once the hub
    /// drops the connection.
    pub messages: mpsc::Receiver<Arc<str>>,
}

struct Connection {
    username: String,
    origin: String,
    queue: mpsc::Sender<Arc<str>>,
}

enum Command {
    Register {
        id: ConnectionId,
        connection: Connection,
    },
    Unregister {
        id: ConnectionId,
    },
    Broadcast {
        message: Arc<str>,
    },
    Count {
        reply: oneshot::Sender<usize>,
    },
}

/// Cloneable handle to the hub coordinator.
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<Command>,
    validator: Arc<dyn SessionValidator>,
    allowed_origins: Arc<[String]>,
    queue_capacity: usize,
}

/// The coordinator. Run it with [`Hub::run`].
pub struct Hub {
    commands: mpsc::Receiver<Command>,
    connections: HashMap<ConnectionId, Connection>,
}

/// Create a hub and its handle.
pub fn channel(
    config: &HubConfig,
    allowed_origins: Vec<String>,
    validator: Arc<dyn SessionValidator>,
) -> (Hub, HubHandle) {
    let (tx, rx) = mpsc::channel(config.command_capacity.max(1));
    let hub = Hub {
        commands: rx,
        connections: HashMap::new(),
    };
    let handle = HubHandle {
        commands: tx,
        validator,
        allowed_origins: allowed_origins.into(),
        queue_capacity: config.queue_capacity.max(1),
    };
    (hub, handle)
}

impl HubHandle {
    /// Admit a connection.
    ///
    /// Checks the origin against the allow-list (same-origin is always
    /// allowed) and validates the session before the connection enters the
    /// registry. The first message in the queue is a `connected` greeting.
    ///
    /// # Errors
    ///
    /// Returns the [`HubRejection`] the caller should report when closing.
    pub async fn register(&self, hello: ClientHello) -> Result<Registration, HubRejection> {
        let origin = hello.origin.ok_or(HubRejection::MissingOrigin)?;
        if !self.origin_allowed(&origin, hello.host.as_deref()) {
            return Err(HubRejection::OriginNotAllowed(origin));
        }

        let token = hello.token.ok_or(HubRejection::MissingCredential)?;
        let session = self.validator.validate(&token).await.map_err(|e| {
            tracing::debug!(error = %e, "Realtime session rejected");
            HubRejection::InvalidCredential
        })?;

        let id = ConnectionId::generate();
        let (queue, messages) = mpsc::channel(self.queue_capacity);
        let greeting = HubEvent::new(
            "connected",
            json!({ "connection_id": id, "username": session.username }),
        );
        let _ = queue.try_send(greeting.to_wire());

        let connection = Connection {
            username: session.username.clone(),
            origin,
            queue,
        };
        self.commands
            .send(Command::Register { id, connection })
            .await
            .map_err(|_| HubRejection::ShuttingDown)?;

        Ok(Registration {
            id,
            username: session.username,
            messages,
        })
    }

    /// Remove a connection. Unknown or already removed IDs are ignored.
    pub async fn unregister(&self, id: ConnectionId) {
        let _ = self.commands.send(Command::Unregister { id }).await;
    }

    /// Queue `event` for every connection without waiting.
    ///
    /// Returns `false` if the coordinator is saturated or gone and the event
    /// was dropped.
    pub fn broadcast(&self, event: &HubEvent) -> bool {
        let message = event.to_wire();
        match self.commands.try_send(Command::Broadcast { message }) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(kind = %event.kind, "Hub command queue full, dropping broadcast");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Number of registered connections.
    pub async fn connection_count(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Count { reply }).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    fn origin_allowed(&self, origin: &str, host: Option<&str>) -> bool {
        let same_origin = host.is_some_and(|host| {
            origin
                .split_once("://")
                .is_some_and(|(_, authority)| authority.eq_ignore_ascii_case(host))
        });
        same_origin || self.allowed_origins.iter().any(|allowed| allowed == origin)
    }
}

impl Hub {
    /// Coordinator loop. Returns when `cancel` fires or every handle is
    /// dropped; all queues are dropped on exit, which ends every writer.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!("Realtime hub started");
        loop {
            let command = tokio::select! {
                () = cancel.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };
            self.handle(command);
        }
        tracing::info!(connections = self.connections.len(), "Realtime hub stopped");
        self.connections.clear();
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Register { id, connection } => {
                tracing::info!(
                    connection_id = %id,
                    username = %connection.username,
                    origin = %connection.origin,
                    "Realtime connection registered"
                );
                self.connections.insert(id, connection);
            }
            Command::Unregister { id } => {
                if self.connections.remove(&id).is_some() {
                    tracing::info!(connection_id = %id, "Realtime connection unregistered");
                }
            }
            Command::Broadcast { message } => self.fan_out(&message),
            Command::Count { reply } => {
                let _ = reply.send(self.connections.len());
            }
        }
    }

    fn fan_out(&mut self, message: &Arc<str>) {
        let mut dropped = Vec::new();
        for (id, connection) in &self.connections {
            match connection.queue.try_send(Arc::clone(message)) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        connection_id = %id,
                        username = %connection.username,
                        "Realtime queue saturated, evicting connection"
                    );
                    dropped.push(*id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => dropped.push(*id),
            }
        }
        for id in dropped {
            self.connections.remove(&id);
        }
    }
}
