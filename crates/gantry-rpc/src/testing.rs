//! In-memory gateway for tests.
//!
//! [`StubGateway`] implements [`Connector`] without sockets. Each call is
//! answered by a swappable handler, so tests can script slow replies, errors,
//! silence, refused connections and dropped links.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, RpcError};
use crate::frame::{Frame, FrameError, Received, PROTOCOL_VERSION};
use crate::transport::{Channel, Connector, CHANNEL_CAPACITY};

/// How the stub answers one call.
#[derive(Debug, Clone)]
pub enum StubReply {
    /// Successful response.
    Ok(Value),
    /// Error response.
    Error {
        /// Error code.
        code: String,
        /// Error message.
        message: String,
    },
    /// A response that fails to decode. The object is sent with the
    /// response's `type` and `id` filled in.
    Malformed(String),
    /// Send the inner reply after a delay.
    After(Duration, Box<StubReply>),
    /// Never answer.
    Ignore,
}

impl StubReply {
    /// Error reply.
    #[must_use]
    pub fn error(code: &str, message: &str) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.to_string(),
        }
    }

    /// Delay this reply.
    #[must_use]
    pub fn after(self, delay: Duration) -> Self {
        Self::After(delay, Box::new(self))
    }
}

/// Call handler: `(method, params) -> reply`.
pub type StubHandler = Arc<dyn Fn(&str, &Value) -> StubReply + Send + Sync>;

struct Link {
    cancel: CancellationToken,
    to_client: mpsc::Sender<Received>,
}

/// Scriptable in-memory gateway.
#[derive(Clone)]
pub struct StubGateway {
    handler: Arc<RwLock<StubHandler>>,
    refusing: Arc<AtomicBool>,
    connects: Arc<AtomicUsize>,
    calls: Arc<Mutex<HashMap<String, usize>>>,
    links: Arc<Mutex<Vec<Link>>>,
}

impl StubGateway {
    /// Stub answering every call with `handler`.
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&str, &Value) -> StubReply + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(RwLock::new(Arc::new(handler))),
            refusing: Arc::new(AtomicBool::new(false)),
            connects: Arc::new(AtomicUsize::new(0)),
            calls: Arc::new(Mutex::new(HashMap::new())),
            links: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Stub that accepts the handshake and health probes and knows no other
    /// method.
    #[must_use]
    pub fn healthy() -> Self {
        Self::new(healthy_reply)
    }

    /// Replace the call handler.
    pub fn set_handler<F>(&self, handler: F)
    where
        F: Fn(&str, &Value) -> StubReply + Send + Sync + 'static,
    {
        *self.handler.write() = Arc::new(handler);
    }

    /// Restore the default healthy handler.
    pub fn set_healthy(&self) {
        self.set_handler(healthy_reply);
    }

    /// Refuse new connections while `true`.
    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Sever every open connection.
    pub fn drop_connections(&self) {
        for link in self.links.lock().drain(..) {
            link.cancel.cancel();
        }
    }

    /// Push an event to every open connection.
    pub fn push_event(&self, event: &str, payload: Value) {
        let mut links = self.links.lock();
        links.retain(|link| !link.to_client.is_closed());
        for link in links.iter() {
            let _ = link.to_client.try_send(Ok(Frame::event(event, payload.clone())));
        }
    }

    /// Number of successful connects so far.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Number of times `method` has been called.
    #[must_use]
    pub fn calls(&self, method: &str) -> usize {
        self.calls.lock().get(method).copied().unwrap_or(0)
    }
}

/// Default handler: handshake and health succeed, everything else is unknown.
pub fn healthy_reply(method: &str, _params: &Value) -> StubReply {
    match method {
        "connect" => StubReply::Ok(json!({ "protocol": PROTOCOL_VERSION, "server": "stub" })),
        "health" => StubReply::Ok(json!({ "ok": true })),
        other => StubReply::error("NOT_FOUND", &format!("unknown method {other}")),
    }
}

#[async_trait]
impl Connector for StubGateway {
    async fn connect(&self, url: &str) -> Result<Channel> {
        if self.refusing.load(Ordering::SeqCst) {
            return Err(RpcError::Unreachable(format!("connection to {url} refused")));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);

        let (outgoing, from_client) = mpsc::channel(CHANNEL_CAPACITY);
        let (to_client, incoming) = mpsc::channel(CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        self.links.lock().push(Link {
            cancel: cancel.clone(),
            to_client: to_client.clone(),
        });
        tokio::spawn(serve(self.clone(), from_client, to_client, cancel));

        Ok(Channel { outgoing, incoming })
    }
}

async fn serve(
    stub: StubGateway,
    mut from_client: mpsc::Receiver<Frame>,
    to_client: mpsc::Sender<Received>,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => break,
            frame = from_client.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        let Frame::Req { id, method, params } = frame else {
            continue;
        };
        *stub.calls.lock().entry(method.clone()).or_default() += 1;

        let handler = stub.handler.read().clone();
        let reply = handler(&method, &params);
        tokio::spawn(answer(id, reply, to_client.clone(), cancel.clone()));
    }
}

async fn answer(
    id: String,
    mut reply: StubReply,
    to_client: mpsc::Sender<Received>,
    cancel: CancellationToken,
) {
    let mut delay = Duration::ZERO;
    while let StubReply::After(extra, inner) = reply {
        delay += extra;
        reply = *inner;
    }

    let received = match reply {
        StubReply::Ok(value) => Ok(Frame::response(id, Ok(value))),
        StubReply::Error { code, message } => {
            Ok(Frame::response(id, Err(FrameError::new(code, message))))
        }
        StubReply::Malformed(body) => Frame::parse(&malformed_text(&body, &id)),
        StubReply::Ignore | StubReply::After(..) => return,
    };

    tokio::select! {
        () = cancel.cancelled() => {}
        () = tokio::time::sleep(delay) => {
            let _ = to_client.send(received).await;
        }
    }
}

fn malformed_text(body: &str, id: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(mut map)) => {
            map.insert("type".to_string(), json!("res"));
            map.insert("id".to_string(), json!(id));
            Value::Object(map).to_string()
        }
        _ => body.to_string(),
    }
}
