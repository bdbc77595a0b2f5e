//! Realtime WebSocket endpoint.
//!
//! The upgrade is always accepted; admission happens afterwards in the hub so
//! a refused client receives a close frame with code 1008 and the reason
//! instead of a bare HTTP error.

use std::borrow::Cow;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::{header, HeaderMap, HeaderName};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;

use crate::auth::{cookie_value, SESSION_COOKIE};
use crate::hub::{ClientHello, HubHandle, Registration};
use crate::state::AppState;

/// Query parameters accepted on upgrade.
#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    /// Session token, for clients that cannot send the cookie.
    pub token: Option<String>,
}

fn header_string(headers: &HeaderMap, name: HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// `GET /ws`
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Option<Query<WsQuery>>,
) -> Response {
    let query_token = query.and_then(|Query(q)| q.token).filter(|t| !t.is_empty());
    let hello = ClientHello {
        origin: header_string(&headers, header::ORIGIN),
        host: header_string(&headers, header::HOST),
        token: cookie_value(&headers, SESSION_COOKIE).or(query_token),
    };
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, hub, hello))
}

async fn handle_socket(mut socket: WebSocket, hub: HubHandle, hello: ClientHello) {
    let Registration {
        id,
        username,
        mut messages,
    } = match hub.register(hello).await {
        Ok(registration) => registration,
        Err(rejection) => {
            tracing::info!(reason = %rejection, "Realtime connection refused");
            let close = CloseFrame {
                code: close_code::POLICY,
                reason: Cow::Owned(rejection.to_string()),
            };
            let _ = socket.send(Message::Close(Some(close))).await;
            return;
        }
    };

    let (mut sink, mut stream) = socket.split();

    // The queue ends when the hub evicts this connection or shuts down.
    let mut writer = tokio::spawn(async move {
        while let Some(message) = messages.recv().await {
            if sink.send(Message::Text(message.to_string())).await.is_err() {
                return;
            }
        }
        let close = CloseFrame {
            code: close_code::AWAY,
            reason: Cow::Borrowed("connection closed by server"),
        };
        let _ = sink.send(Message::Close(Some(close))).await;
    });

    // Pings are answered by axum; only close and errors matter here.
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(message)) = stream.next().await {
            if matches!(message, Message::Close(_)) {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    hub.unregister(id).await;
    tracing::info!(connection_id = %id, username = %username, "Realtime connection closed");
}
