//! axum WebSocket endpoint and per-connection socket loop

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use crate::connection::{ConnectionHandle, ConnectionRegistry, Outbound};
use crate::error::RelayError;
use crate::protocol::Dispatcher;
use crate::session::SessionManager;

/// Body returned to plain HTTP requests
pub const HEALTH_BODY: &str = "location relay is running";

/// How long the writer gets to flush a close frame after the reader stops
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Shared state behind every route
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub sessions: Arc<SessionManager>,
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self {
            registry: sessions.registry().clone(),
            dispatcher: Arc::new(Dispatcher::new(sessions.clone())),
            sessions,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .with_state(state)
}

async fn health() -> &'static str {
    HEALTH_BODY
}

/// Upgrade when the request asks for it, otherwise answer like `/health`
async fn root(
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    match upgrade {
        Ok(ws) => upgrade_response(ws, addr, state),
        Err(_) => HEALTH_BODY.into_response(),
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    upgrade_response(ws, addr, state)
}

fn upgrade_response(ws: WebSocketUpgrade, addr: SocketAddr, state: AppState) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, addr, state))
}

fn to_frame(outbound: Outbound) -> Message {
    match outbound {
        Outbound::Text(text) => Message::Text(text.into()),
        Outbound::Ping => Message::Ping(Bytes::new()),
        Outbound::Close => Message::Close(None),
    }
}

async fn handle_socket(socket: WebSocket, addr: SocketAddr, state: AppState) {
    let conn_id = state.registry.next_id();
    let (handle, mut outbound) = ConnectionHandle::channel(conn_id.clone(), Some(addr));
    state.registry.register(handle.clone()).await;
    let open = state.registry.len().await;
    info!(conn_id = %conn_id, remote = %addr, open, "connection opened");

    let (mut sink, mut stream) = socket.split();

    let writer_id = conn_id.clone();
    let mut writer = tokio::spawn(async move {
        while let Some(item) = outbound.recv().await {
            let closing = item == Outbound::Close;
            if let Err(e) = sink.send(to_frame(item)).await {
                debug!(conn_id = %writer_id, error = %e, "write failed");
                break;
            }
            if closing {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut writer_done = false;
    let mut terminated = false;
    let reason = loop {
        tokio::select! {
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    state.dispatcher.handle_text(&handle, text.as_str()).await;
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => handle.mark_alive(),
                Some(Ok(Message::Binary(data))) => {
                    handle.mark_alive();
                    debug!(conn_id = %conn_id, len = data.len(), "ignoring binary frame");
                }
                Some(Ok(Message::Close(_))) | None => break "client closed",
                Some(Err(e)) => {
                    let err = RelayError::TransportError(e.to_string());
                    warn!(conn_id = %conn_id, error = %err, "websocket read error");
                    break "transport error";
                }
            },
            _ = &mut writer => {
                writer_done = true;
                break "closed by relay";
            }
            _ = handle.terminated() => {
                terminated = true;
                break "terminated by relay";
            }
        }
    };

    state.sessions.disconnect(&conn_id, reason).await;
    if writer_done {
        return;
    }
    // A terminated peer may never drain its backlog
    if terminated || timeout(CLOSE_GRACE, &mut writer).await.is_err() {
        writer.abort();
    }
}
