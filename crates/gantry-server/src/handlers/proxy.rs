//! Forwarding of browser calls to the gateway.
//!
//! Plain calls return the gateway's result in the envelope. Two routes stream
//! over Server-Sent Events instead:
//!
//! ```text
//! /api/logs/stream            lines, lines, ..., error
//! /api/gateway/stream/:method started, progress, progress, ..., result | error
//! ```

use std::convert::Infallible;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::future::BoxFuture;
use futures::{stream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::{Instant, Interval};

use gantry_rpc::{RpcError, SessionSnapshot};

use crate::error::{ApiError, ApiResponse};
use crate::state::AppState;

const MAX_METHOD_LEN: usize = 128;
const MIN_TIMEOUT_MS: u64 = 100;
const MAX_TIMEOUT_MS: u64 = 5 * 60 * 1000;

const DEFAULT_TAIL_LIMIT: u32 = 200;
const MAX_TAIL_LIMIT: u32 = 1000;
const DEFAULT_TAIL_INTERVAL_MS: u64 = 1000;
const MIN_HEARTBEAT: Duration = Duration::from_secs(1);

/// Query parameters for forwarded calls.
#[derive(Debug, Default, Deserialize)]
pub struct CallQuery {
    /// Per-call timeout, clamped to 100 ms ..= 5 min.
    pub timeout_ms: Option<u64>,
}

/// Query parameters for the log tail stream.
#[derive(Debug, Default, Deserialize)]
pub struct LogsQuery {
    /// Resume after this cursor.
    pub cursor: Option<u64>,
    /// Lines per poll.
    pub limit: Option<u32>,
    /// Poll interval in milliseconds.
    pub interval_ms: Option<u64>,
}

/// Returned by `GET /api/gateway/status`.
#[derive(Debug, Serialize)]
pub struct GatewayStatus {
    /// Whether calls can currently be forwarded.
    pub connected: bool,
    /// Connection details.
    #[serde(flatten)]
    pub session: SessionSnapshot,
    /// Open realtime connections.
    pub realtime_connections: usize,
}

fn validate_method(method: &str) -> Result<(), ApiError> {
    let valid = !method.is_empty()
        && method.len() <= MAX_METHOD_LEN
        && method
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'));
    if valid {
        Ok(())
    } else {
        Err(ApiError::BadRequest(format!("invalid method name: {method}")))
    }
}

/// An empty body means no parameters.
fn parse_params(body: &Bytes) -> Result<Value, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(json!({}));
    }
    match serde_json::from_slice(body) {
        Ok(Value::Null) => Ok(json!({})),
        Ok(params @ Value::Object(_)) => Ok(params),
        Ok(_) => Err(ApiError::BadRequest(
            "params must be a JSON object".to_string(),
        )),
        Err(e) => Err(ApiError::BadRequest(format!("invalid JSON body: {e}"))),
    }
}

fn call_timeout(state: &AppState, query: &CallQuery) -> Duration {
    query.timeout_ms.map_or_else(
        || state.config.request_timeout(),
        |ms| Duration::from_millis(ms.clamp(MIN_TIMEOUT_MS, MAX_TIMEOUT_MS)),
    )
}

fn sse_event(name: &str, data: &Value) -> Event {
    Event::default().event(name).data(data.to_string())
}

fn error_payload(err: &RpcError) -> Value {
    let api = ApiError::from(err.clone());
    json!({
        "error_code": api.code(),
        "message": api.public_message(),
        "retriable": err.is_retriable(),
    })
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// `POST /api/gateway/call/:method`
///
/// # Errors
///
/// `BAD_REQUEST` for an invalid method or body, otherwise the mapped gateway
/// error.
pub async fn call(
    State(state): State<AppState>,
    Path(method): Path<String>,
    query: Result<Query<CallQuery>, QueryRejection>,
    body: Bytes,
) -> Result<ApiResponse<Value>, ApiError> {
    let Query(query) = query?;
    validate_method(&method)?;
    let params = parse_params(&body)?;
    let timeout = call_timeout(&state, &query);

    tracing::debug!(method = %method, timeout_ms = millis(timeout), "Forwarding gateway call");
    let result = state.gateway.request(&method, params, timeout).await?;
    Ok(ApiResponse::ok(result))
}

/// `GET /api/config`
///
/// # Errors
///
/// The mapped gateway error.
pub async fn config(State(state): State<AppState>) -> Result<ApiResponse<Value>, ApiError> {
    let result = state
        .gateway
        .request("config.get", json!({}), state.config.request_timeout())
        .await?;
    Ok(ApiResponse::ok(result))
}

/// `GET /api/gateway/status`
pub async fn status(State(state): State<AppState>) -> ApiResponse<GatewayStatus> {
    ApiResponse::ok(GatewayStatus {
        connected: state.gateway.is_connected(),
        session: state.gateway.session(),
        realtime_connections: state.hub.connection_count().await,
    })
}

struct LogTail {
    cursor: Option<u64>,
    first_poll: bool,
}

/// `GET /api/logs/stream`
///
/// Polls `logs.tail`, which answers `{cursor, lines}`. Each non-empty batch
/// becomes a `lines` event. The first failure is sent as an `error` event
/// and ends the stream.
///
/// # Errors
///
/// `BAD_REQUEST` for malformed query parameters.
pub async fn logs_stream(
    State(state): State<AppState>,
    query: Result<Query<LogsQuery>, QueryRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let Query(query) = query?;
    let limit = query.limit.unwrap_or(DEFAULT_TAIL_LIMIT).clamp(1, MAX_TAIL_LIMIT);
    let interval = Duration::from_millis(
        query
            .interval_ms
            .unwrap_or(DEFAULT_TAIL_INTERVAL_MS)
            .clamp(MIN_TIMEOUT_MS, MAX_TIMEOUT_MS),
    );
    let timeout = state.config.request_timeout();
    let gateway = state.gateway.clone();

    let tail = LogTail {
        cursor: query.cursor,
        first_poll: true,
    };
    let events = stream::unfold(Some(tail), move |tail| {
        let gateway = gateway.clone();
        async move {
            let mut tail = tail?;
            loop {
                if !tail.first_poll {
                    tokio::time::sleep(interval).await;
                }
                tail.first_poll = false;

                let params = json!({ "cursor": tail.cursor, "limit": limit });
                match gateway.request("logs.tail", params, timeout).await {
                    Ok(batch) => {
                        if let Some(cursor) = batch.get("cursor").and_then(Value::as_u64) {
                            tail.cursor = Some(cursor);
                        }
                        let lines = match batch.get("lines") {
                            Some(Value::Array(lines)) if !lines.is_empty() => lines.clone(),
                            _ => continue,
                        };
                        let event =
                            sse_event("lines", &json!({ "cursor": tail.cursor, "lines": lines }));
                        return Some((Ok::<_, Infallible>(event), Some(tail)));
                    }
                    Err(err) => {
                        tracing::debug!(error = %err, "Log tail ended");
                        let event = sse_event("error", &error_payload(&err));
                        return Some((Ok::<_, Infallible>(event), None));
                    }
                }
            }
        }
    });

    let events = events.take_until(state.shutdown.clone().cancelled_owned());
    let keep_alive = KeepAlive::new().interval(state.config.stream_heartbeat().max(MIN_HEARTBEAT));
    Ok(Sse::new(events).keep_alive(keep_alive))
}

enum CallPhase {
    Starting {
        method: String,
        call: BoxFuture<'static, gantry_rpc::Result<Value>>,
    },
    Waiting {
        call: BoxFuture<'static, gantry_rpc::Result<Value>>,
        started_at: Instant,
        heartbeat: Interval,
    },
    Done,
}

/// `POST /api/gateway/stream/:method`
///
/// Like [`call`], but answers immediately with an event stream: `started`,
/// a `progress` heartbeat while the gateway works, then exactly one `result`
/// or `error`.
///
/// # Errors
///
/// `BAD_REQUEST` for an invalid method, body or query.
pub async fn stream_call(
    State(state): State<AppState>,
    Path(method): Path<String>,
    query: Result<Query<CallQuery>, QueryRejection>,
    body: Bytes,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let Query(query) = query?;
    validate_method(&method)?;
    let params = parse_params(&body)?;
    let timeout = call_timeout(&state, &query);
    let heartbeat_every = state.config.stream_heartbeat().max(MIN_HEARTBEAT);

    let gateway = state.gateway.clone();
    let call_method = method.clone();
    let call: BoxFuture<'static, gantry_rpc::Result<Value>> =
        Box::pin(async move { gateway.request(&call_method, params, timeout).await });

    let events = stream::unfold(CallPhase::Starting { method, call }, move |phase| async move {
        match phase {
            CallPhase::Starting { method, call } => {
                let started = sse_event(
                    "started",
                    &json!({ "method": method, "timeout_ms": millis(timeout) }),
                );
                let heartbeat =
                    tokio::time::interval_at(Instant::now() + heartbeat_every, heartbeat_every);
                let next = CallPhase::Waiting {
                    call,
                    started_at: Instant::now(),
                    heartbeat,
                };
                Some((Ok::<_, Infallible>(started), next))
            }
            CallPhase::Waiting {
                mut call,
                started_at,
                mut heartbeat,
            } => {
                tokio::select! {
                    result = &mut call => {
                        let event = match result {
                            Ok(value) => sse_event("result", &value),
                            Err(err) => sse_event("error", &error_payload(&err)),
                        };
                        Some((Ok::<_, Infallible>(event), CallPhase::Done))
                    }
                    _ = heartbeat.tick() => {
                        let progress = sse_event(
                            "progress",
                            &json!({ "elapsed_ms": millis(started_at.elapsed()) }),
                        );
                        let next = CallPhase::Waiting { call, started_at, heartbeat };
                        Some((Ok::<_, Infallible>(progress), next))
                    }
                }
            }
            CallPhase::Done => None,
        }
    });

    Ok(Sse::new(events.take_until(state.shutdown.clone().cancelled_owned())))
}
