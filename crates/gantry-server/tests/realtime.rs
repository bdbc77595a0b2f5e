//! Realtime hub over a real socket.

mod common;

use std::net::SocketAddr;
use std::time::Duration;

use futures::StreamExt;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use common::{Harness, ADMIN};
use gantry_server::hub::HubEvent;
use gantry_server::{AppState, ServerConfig};

const ORIGIN: &str = "https://admin.example.com";

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Running {
    addr: SocketAddr,
    state: AppState,
    stub: gantry_rpc::testing::StubGateway,
    token: String,
    stop: oneshot::Sender<()>,
    server: JoinHandle<std::io::Result<()>>,
}

async fn serve() -> Running {
    let config = ServerConfig {
        cors_origins: vec![ORIGIN.to_string()],
        shutdown_grace_seconds: 2,
        ..ServerConfig::default()
    };
    let harness = Harness::new(config);
    harness.wait_connected().await;
    let token = harness.token();
    let state = harness.app.state().clone();
    let stub = harness.stub.clone();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel::<()>();
    let server = tokio::spawn(harness.app.serve(listener, async move {
        let _ = stopped.await;
    }));

    Running {
        addr,
        state,
        stub,
        token,
        stop,
        server,
    }
}

async fn connect(addr: SocketAddr, origin: Option<&str>, token: Option<&str>) -> Socket {
    let url = match token {
        Some(token) => format!("ws://{addr}/ws?token={token}"),
        None => format!("ws://{addr}/ws"),
    };
    let mut request = url.into_client_request().unwrap();
    if let Some(origin) = origin {
        request
            .headers_mut()
            .insert("origin", origin.parse().unwrap());
    }
    let (socket, _) = tokio_tungstenite::connect_async(request).await.unwrap();
    socket
}

async fn next_message(socket: &mut Socket) -> Message {
    tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .expect("no message")
        .expect("socket ended")
        .expect("socket error")
}

async fn next_event(socket: &mut Socket) -> Value {
    match next_message(socket).await {
        Message::Text(text) => serde_json::from_str(&text).unwrap(),
        other => panic!("expected text, got {other:?}"),
    }
}

async fn event_of_type(socket: &mut Socket, kind: &str) -> Value {
    loop {
        let event = next_event(socket).await;
        if event["type"] == kind {
            return event;
        }
    }
}

async fn expect_close(socket: &mut Socket, code: CloseCode) -> String {
    loop {
        match next_message(socket).await {
            Message::Close(Some(frame)) => {
                assert_eq!(frame.code, code);
                return frame.reason.to_string();
            }
            Message::Close(None) => panic!("close without a frame"),
            _ => {}
        }
    }
}

async fn wait_for_connections(state: &AppState, expected: usize) {
    for _ in 0..100 {
        if state.hub.connection_count().await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("hub never reached {expected} connections");
}

#[tokio::test]
async fn authenticated_client_is_greeted_and_receives_events() {
    let running = serve().await;
    let mut socket = connect(running.addr, Some(ORIGIN), Some(&running.token)).await;

    let greeting = next_event(&mut socket).await;
    assert_eq!(greeting["type"], "connected");
    assert_eq!(greeting["payload"]["username"], ADMIN);
    assert!(greeting["timestamp"].is_string());
    wait_for_connections(&running.state, 1).await;

    running
        .stub
        .push_event("agent.status", json!({ "agent": "a1", "status": "running" }));
    let event = event_of_type(&mut socket, "gateway.agent.status").await;
    assert_eq!(event["payload"]["agent"], "a1");

    running
        .state
        .hub
        .broadcast(&HubEvent::new("auth.login", json!({ "username": "other" })));
    let event = event_of_type(&mut socket, "auth.login").await;
    assert_eq!(event["payload"]["username"], "other");

    drop(socket);
    wait_for_connections(&running.state, 0).await;
}

#[tokio::test]
async fn foreign_origin_is_closed_with_policy_code() {
    let running = serve().await;
    let mut socket =
        connect(running.addr, Some("https://evil.example"), Some(&running.token)).await;

    let reason = expect_close(&mut socket, CloseCode::Policy).await;
    assert!(reason.contains("origin"));
    assert_eq!(running.state.hub.connection_count().await, 0);
}

#[tokio::test]
async fn missing_or_bad_credentials_are_closed_with_policy_code() {
    let running = serve().await;

    let mut socket = connect(running.addr, Some(ORIGIN), None).await;
    let reason = expect_close(&mut socket, CloseCode::Policy).await;
    assert!(reason.contains("authentication required"));

    let mut socket = connect(running.addr, Some(ORIGIN), Some("forged.token.value")).await;
    let reason = expect_close(&mut socket, CloseCode::Policy).await;
    assert!(reason.contains("invalid session"));

    let mut socket = connect(running.addr, None, Some(&running.token)).await;
    expect_close(&mut socket, CloseCode::Policy).await;
}

#[tokio::test]
async fn shutdown_closes_realtime_connections() {
    let running = serve().await;
    let mut socket = connect(running.addr, Some(ORIGIN), Some(&running.token)).await;
    next_event(&mut socket).await;
    wait_for_connections(&running.state, 1).await;

    running.stop.send(()).unwrap();
    expect_close(&mut socket, CloseCode::Away).await;

    tokio::time::timeout(Duration::from_secs(20), running.server)
        .await
        .expect("server did not stop")
        .unwrap()
        .unwrap();
    assert!(running.state.shutdown.is_cancelled());
}
