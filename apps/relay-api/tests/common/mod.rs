#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use relay_api::config::Config;
use relay_api::gateway::Hub;
use relay_api::AppState;

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Build a config from command-line style flags, ignoring `.env`.
pub fn test_config(args: &[&str]) -> Config {
    let mut config = Config::try_parse_from(std::iter::once("relay-api").chain(args.iter().copied()))
        .expect("valid test config");
    config.normalize();
    config
}

/// Spawn a hub configured the way `main` does it.
pub fn test_state(args: &[&str]) -> AppState {
    let config = test_config(args);
    let hub = Hub::spawn(config.hub_config());
    for room in config.initial_rooms() {
        hub.create_room(&room).expect("create initial room");
    }
    AppState {
        hub,
        config: Arc::new(config),
    }
}

pub fn test_app(args: &[&str]) -> (Router, AppState) {
    let state = test_state(args);
    let app = relay_api::routes::router(&state).with_state(state.clone());
    (app, state)
}

/// Start an actual TCP server for WebSocket testing. The server runs in the
/// background.
pub async fn start_ws_server(args: &[&str]) -> (SocketAddr, AppState) {
    let (app, state) = test_app(args);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state)
}

/// Connect a client to `room` as `name`.
pub async fn connect(addr: SocketAddr, room: &str, name: &str) -> WsClient {
    let url = format!("ws://{addr}/ws?room={room}&name={name}");
    let (ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("ws connect");
    ws
}

pub async fn send_chat(ws: &mut WsClient, text: &str) {
    let frame = serde_json::json!({ "type": "chat", "text": text });
    ws.send(Message::Text(frame.to_string().into()))
        .await
        .expect("send chat");
}

/// Next JSON envelope from the server, skipping control frames.
pub async fn recv_json(ws: &mut WsClient) -> serde_json::Value {
    loop {
        let msg = time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for envelope")
            .expect("stream ended")
            .expect("ws error");
        match msg {
            Message::Text(text) => return serde_json::from_str(&text).expect("envelope is JSON"),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// Assert nothing arrives within `wait`.
pub async fn assert_silent(ws: &mut WsClient, wait: Duration) {
    if let Ok(Some(Ok(tungstenite::Message::Text(text)))) = time::timeout(wait, ws.next()).await {
        panic!("unexpected envelope: {}", text.as_str());
    }
}

/// Wait until the hub has admitted `count` sessions.
pub async fn wait_for_sessions(state: &AppState, count: usize) {
    for _ in 0..100 {
        if state.hub.session_count() == count {
            return;
        }
        time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "expected {count} sessions, hub has {}",
        state.hub.session_count()
    );
}
