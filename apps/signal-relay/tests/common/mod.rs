#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use signal_relay::bus::memory::MemoryBus;
use signal_relay::config::Config;
use signal_relay::directory::memory::MemoryDirectory;
use signal_relay::AppState;

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// A relay served on an ephemeral port, backed by in-memory bus and
/// directory that the test can inspect and manipulate.
pub struct TestRelay {
    pub addr: SocketAddr,
    pub state: AppState,
    pub bus: Arc<MemoryBus>,
    pub directory: Arc<MemoryDirectory>,
}

pub fn test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        directory_url: "memory".to_string(),
        directory_timeout: Duration::from_millis(500),
        redis_url: "memory".to_string(),
        bus_retry_initial: Duration::from_millis(10),
        bus_retry_max: Duration::from_millis(50),
        outbound_queue_capacity: 64,
    }
}

/// Start a relay with its own bus and directory.
pub async fn start_relay() -> TestRelay {
    start_relay_with(Arc::new(MemoryBus::new()), Arc::new(MemoryDirectory::new())).await
}

/// Start a relay on a shared bus and directory, so several relays in one
/// test behave like separate nodes of one deployment.
pub async fn start_relay_with(bus: Arc<MemoryBus>, directory: Arc<MemoryDirectory>) -> TestRelay {
    let state = AppState::new(test_config(), bus.clone(), directory.clone());
    state.bridge.start();

    let app = signal_relay::routes::router().with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let bridge = state.bridge.clone();
    time::timeout(RECV_TIMEOUT, async {
        while !bridge.is_connected().await {
            time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("bus listener never connected");

    TestRelay {
        addr,
        state,
        bus,
        directory,
    }
}

/// Open a WebSocket to `/ws/{room_id}/{user_id}`.
pub async fn connect(addr: SocketAddr, room_id: i64, user_id: i64) -> Client {
    let url = format!("ws://{addr}/ws/{room_id}/{user_id}");
    let (ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("ws connect");
    ws
}

/// Connect and consume the `existing_users` roster, returning its ids.
pub async fn join(addr: SocketAddr, room_id: i64, user_id: i64) -> (Client, Vec<i64>) {
    let mut ws = connect(addr, room_id, user_id).await;
    let roster = recv_json(&mut ws).await;
    assert_eq!(roster["type"], "existing_users", "first frame must be the roster");
    let ids = roster["ids"]
        .as_array()
        .expect("ids array")
        .iter()
        .map(|id| id.as_i64().expect("numeric id"))
        .collect();
    (ws, ids)
}

pub async fn send_json(ws: &mut Client, value: Value) {
    ws.send(Message::Text(value.to_string().into()))
        .await
        .expect("send");
}

/// Next text frame, parsed as JSON.
pub async fn recv_json(ws: &mut Client) -> Value {
    loop {
        let msg = time::timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for frame")
            .expect("stream ended")
            .expect("ws read error");
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).expect("parse frame"),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected text frame, got {other:?}"),
        }
    }
}

/// Skip frames until one of the given `type` arrives.
pub async fn recv_type(ws: &mut Client, kind: &str) -> Value {
    loop {
        let frame = recv_json(ws).await;
        if frame["type"] == kind {
            return frame;
        }
    }
}

/// Skip frames until the server closes; returns the close code and reason.
pub async fn expect_close(ws: &mut Client) -> (u16, String) {
    loop {
        let msg = time::timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for close")
            .expect("stream ended without close frame")
            .expect("ws read error");
        if let Message::Close(frame) = msg {
            let frame = frame.expect("close frame without code");
            return (u16::from(frame.code), frame.reason.as_str().to_string());
        }
    }
}

/// Assert no further text frame arrives within `window`.
pub async fn expect_silence(ws: &mut Client, window: Duration) {
    match time::timeout(window, ws.next()).await {
        Err(_) => {}
        Ok(Some(Ok(Message::Text(text)))) => panic!("unexpected frame: {text}"),
        Ok(other) => panic!("unexpected event: {other:?}"),
    }
}

/// Poll `cond` until it holds or the timeout expires.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    time::timeout(RECV_TIMEOUT, async {
        while !cond() {
            time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never became true");
}
