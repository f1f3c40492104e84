//! WebSocket upgrade handler and per-session read/write pumps.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};

use crate::auth::origin::AllowedOrigin;
use crate::error::ApiError;
use crate::AppState;

use super::hub::Hub;
use super::session::{OutboundPayload, Session};

/// Room used when the client does not name one.
pub const DEFAULT_ROOM: &str = "lobby";

/// Largest inbound frame accepted from a client (512 KiB).
const MAX_FRAME_BYTES: usize = 512 * 1024;

/// Time allowed to write one frame.
const WRITE_WAIT: Duration = Duration::from_secs(10);

/// Time allowed between pongs before the connection is considered dead.
const PONG_WAIT: Duration = Duration::from_secs(60);

/// Interval between pings. Must be shorter than `PONG_WAIT`.
const PING_PERIOD: Duration = Duration::from_secs(30);

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(ws_upgrade))
}

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    #[serde(default)]
    pub room: String,
    #[serde(default)]
    pub name: String,
}

async fn ws_upgrade(
    _origin: AllowedOrigin,
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let room = if params.room.is_empty() {
        DEFAULT_ROOM.to_string()
    } else {
        params.room
    };
    if params.name.is_empty() {
        return Err(ApiError::bad_request("name parameter is required"));
    }
    if !state.hub.is_room_allowed(&room) {
        return Err(ApiError::forbidden("Room does not exist"));
    }

    let hub = Arc::clone(&state.hub);
    let name = params.name;
    Ok(ws
        .max_message_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| handle_connection(socket, hub, name, room))
        .into_response())
}

async fn handle_connection(socket: WebSocket, hub: Arc<Hub>, name: String, room: String) {
    let (session, outbound_rx) = Session::new(name, room);
    let (ws_tx, ws_rx) = socket.split();

    hub.admit(Arc::clone(&session));

    tokio::spawn(write_pump(Arc::clone(&session), ws_tx, outbound_rx));
    read_pump(session, hub, ws_rx).await;
}

/// Read client frames until the socket closes, errors, misses the pong
/// deadline, or the session is closed. Then ask the hub to evict the session.
async fn read_pump(session: Arc<Session>, hub: Arc<Hub>, mut ws_rx: WsStream) {
    let mut deadline = Instant::now() + PONG_WAIT;

    loop {
        let next = tokio::select! {
            _ = session.closed() => break,
            next = time::timeout_at(deadline, ws_rx.next()) => next,
        };

        let msg = match next {
            Ok(Some(Ok(msg))) => msg,
            Ok(Some(Err(e))) => {
                tracing::debug!(?e, session_id = %session.id, "ws read error");
                break;
            }
            Ok(None) => break,
            Err(_) => {
                tracing::debug!(session_id = %session.id, "pong deadline missed");
                break;
            }
        };

        match msg {
            Message::Text(text) => match session.accept_frame(&text) {
                Ok(envelope) => {
                    if hub.route(envelope).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    tracing::debug!(
                        session_id = %session.id,
                        name = %session.name,
                        %err,
                        "dropping invalid frame"
                    );
                }
            },
            Message::Pong(_) => deadline = Instant::now() + PONG_WAIT,
            Message::Close(_) => break,
            Message::Binary(_) | Message::Ping(_) => continue,
        }
    }

    hub.evict(session);
}

/// Drain the outbound queue onto the socket and keep the connection alive
/// with periodic pings. Exits on the first write failure.
async fn write_pump(
    session: Arc<Session>,
    mut ws_tx: WsSink,
    mut outbound_rx: mpsc::Receiver<OutboundPayload>,
) {
    let mut ping = time::interval_at(Instant::now() + PING_PERIOD, PING_PERIOD);

    loop {
        tokio::select! {
            _ = session.closed() => {
                // Stop accepting envelopes, flush what is already queued.
                outbound_rx.close();
                while let Some(payload) = outbound_rx.recv().await {
                    if write(&mut ws_tx, Message::Text(payload.to_string().into())).await.is_err() {
                        return;
                    }
                }
                tracing::debug!(session_id = %session.id, "send queue closed");
                let _ = send_close(&mut ws_tx, close_code::NORMAL, "").await;
                return;
            }
            payload = outbound_rx.recv() => {
                let Some(payload) = payload else {
                    let _ = send_close(&mut ws_tx, close_code::NORMAL, "").await;
                    return;
                };
                if let Err(err) = write(&mut ws_tx, Message::Text(payload.to_string().into())).await {
                    tracing::debug!(session_id = %session.id, %err, "failed to write message");
                    return;
                }
            }
            _ = ping.tick() => {
                if let Err(err) = write(&mut ws_tx, Message::Ping(Default::default())).await {
                    tracing::debug!(session_id = %session.id, %err, "failed to write ping");
                    return;
                }
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum WriteError {
    #[error("write timed out")]
    Timeout,
    #[error(transparent)]
    Socket(#[from] axum::Error),
}

async fn write(ws_tx: &mut WsSink, msg: Message) -> Result<(), WriteError> {
    time::timeout(WRITE_WAIT, ws_tx.send(msg))
        .await
        .map_err(|_| WriteError::Timeout)??;
    Ok(())
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(ws_tx: &mut WsSink, code: u16, reason: &str) -> Result<(), WriteError> {
    let close_msg = Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    write(ws_tx, close_msg).await
}
