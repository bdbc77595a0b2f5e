//! Transport abstraction for the gateway connection.
//!
//! A [`Connector`] opens one connection and hands back a [`Channel`]: a pair
//! of frame queues. The client never touches sockets directly, which keeps the
//! state machine testable against an in-memory gateway.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::{Result, RpcError};
use crate::frame::{Frame, Received};

/// Capacity of the per-connection frame queues.
pub const CHANNEL_CAPACITY: usize = 256;

/// An open connection expressed as frame queues.
///
/// Dropping `outgoing` closes the connection. `incoming` yields `None` once
/// the peer has gone away. Messages that fail to decode are delivered as
/// errors so the receive path can fail the matching request.
pub struct Channel {
    /// Frames to send to the gateway.
    pub outgoing: mpsc::Sender<Frame>,
    /// Messages received from the gateway.
    pub incoming: mpsc::Receiver<Received>,
}

/// Opens connections to the gateway.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new connection to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Unreachable`] if the gateway cannot be reached.
    async fn connect(&self, url: &str) -> Result<Channel>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket connector backed by `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Channel> {
        let (ws_stream, response) = connect_async(url)
            .await
            .map_err(|e| RpcError::Unreachable(e.to_string()))?;

        tracing::debug!(url = %url, status = %response.status(), "Gateway WebSocket handshake complete");

        let (write, read) = ws_stream.split();
        let (outgoing_tx, outgoing_rx) = mpsc::channel::<Frame>(CHANNEL_CAPACITY);
        let (incoming_tx, incoming_rx) = mpsc::channel::<Received>(CHANNEL_CAPACITY);

        tokio::spawn(ws_writer(write, outgoing_rx));
        tokio::spawn(ws_reader(read, incoming_tx));

        Ok(Channel {
            outgoing: outgoing_tx,
            incoming: incoming_rx,
        })
    }
}

/// Task that writes outgoing frames; sends a close frame once the queue closes.
async fn ws_writer(mut write: SplitSink<WsStream, Message>, mut rx: mpsc::Receiver<Frame>) {
    while let Some(frame) = rx.recv().await {
        let text = match frame.encode() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, "Dropping unencodable frame");
                continue;
            }
        };
        if let Err(e) = write.send(Message::Text(text)).await {
            tracing::debug!(error = %e, "Gateway write failed");
            return;
        }
    }
    let _ = write.send(Message::Close(None)).await;
}

/// Task that decodes incoming messages into frames.
async fn ws_reader(mut read: SplitStream<WsStream>, tx: mpsc::Sender<Received>) {
    while let Some(message) = read.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(data)) => match String::from_utf8(data) {
                Ok(text) => text,
                Err(_) => {
                    tracing::warn!("Ignoring non-UTF-8 binary frame from gateway");
                    continue;
                }
            },
            Ok(Message::Close(frame)) => {
                tracing::debug!(frame = ?frame, "Gateway closed the connection");
                break;
            }
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
            Err(e) => {
                tracing::debug!(error = %e, "Gateway read failed");
                break;
            }
        };

        if tx.send(Frame::parse(&text)).await.is_err() {
            break;
        }
    }
}
