//! End-to-end tests: the real router on an ephemeral port, driven by
//! WebSocket and HTTP clients.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tower::ServiceExt;

use tictactoe_relay::app_state::AppState;
use tictactoe_relay::build_app;
use tictactoe_relay::config::ConnectionSettings;
use tictactoe_relay::domain::Hub;

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WELCOME: &str = r#"{"type":"welcome","payload":{"message":"Hello from server!"}}"#;
const QUIET: Duration = Duration::from_millis(200);

async fn spawn_server(settings: ConnectionSettings) -> (SocketAddr, Hub) {
    let hub = Hub::start(64);
    let app = build_app(AppState {
        hub: hub.clone(),
        connection: settings,
    });
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, hub)
}

async fn connect(addr: SocketAddr) -> WsClient {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .unwrap();
    ws
}

async fn wait_for_clients(hub: &Hub, expected: usize) {
    tokio::time::timeout(Duration::from_secs(3), async {
        while hub.client_count().await.unwrap() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("hub never reached {expected} clients"));
}

/// Next text frame, skipping control frames. `None` once the server closes.
async fn next_text(ws: &mut WsClient) -> Option<String> {
    while let Some(message) = ws.next().await {
        match message.ok()? {
            Message::Text(text) => return Some(text.as_str().to_owned()),
            Message::Close(_) => return None,
            _ => {}
        }
    }
    None
}

/// Collects `count` relayed frames, undoing server-side coalescing.
async fn next_frames(ws: &mut WsClient, count: usize) -> Vec<String> {
    let mut frames = Vec::new();
    while frames.len() < count {
        let text = tokio::time::timeout(Duration::from_secs(3), next_text(ws))
            .await
            .unwrap()
            .unwrap();
        frames.extend(text.split('\n').map(str::to_owned));
    }
    frames
}

/// In-memory log sink for asserting on what the server reported.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

async fn assert_silent(ws: &mut WsClient) {
    assert!(
        tokio::time::timeout(QUIET, next_text(ws)).await.is_err(),
        "unexpected frame"
    );
}

#[tokio::test]
async fn hello_is_answered_only_on_the_same_connection() {
    let (addr, hub) = spawn_server(ConnectionSettings::default()).await;
    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    wait_for_clients(&hub, 2).await;

    a.send(Message::text(r#"{"type":"hello"}"#)).await.unwrap();

    assert_eq!(next_frames(&mut a, 1).await, vec![WELCOME.to_string()]);
    assert_silent(&mut b).await;
}

#[tokio::test]
async fn moves_reach_every_other_client_in_order() {
    let (addr, hub) = spawn_server(ConnectionSettings::default()).await;
    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    let mut c = connect(addr).await;
    wait_for_clients(&hub, 3).await;

    let moves: Vec<String> = (0..3)
        .map(|cell| format!(r#"{{"type":"move","payload":{{"cell":{cell}}}}}"#))
        .collect();
    for frame in &moves {
        b.send(Message::text(frame.clone())).await.unwrap();
    }

    assert_eq!(next_frames(&mut a, 3).await, moves);
    assert_eq!(next_frames(&mut c, 3).await, moves);
    assert_silent(&mut b).await;
}

#[tokio::test]
async fn malformed_frames_are_skipped() {
    let (addr, hub) = spawn_server(ConnectionSettings::default()).await;
    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    wait_for_clients(&hub, 2).await;

    a.send(Message::text("definitely not json")).await.unwrap();
    a.send(Message::text(r#"{"type":"hello"}"#)).await.unwrap();

    assert_eq!(next_frames(&mut a, 1).await, vec![WELCOME.to_string()]);
    assert_silent(&mut b).await;
    assert_eq!(hub.client_count().await.unwrap(), 2);
}

#[tokio::test]
async fn late_joiner_sees_no_earlier_broadcasts() {
    let (addr, hub) = spawn_server(ConnectionSettings::default()).await;
    let mut a = connect(addr).await;
    wait_for_clients(&hub, 1).await;
    a.send(Message::text(r#"{"type":"move","payload":1}"#))
        .await
        .unwrap();

    let mut late = connect(addr).await;
    wait_for_clients(&hub, 2).await;
    assert_silent(&mut late).await;

    a.send(Message::text(r#"{"type":"move","payload":2}"#))
        .await
        .unwrap();
    assert_eq!(
        next_frames(&mut late, 1).await,
        vec![r#"{"type":"move","payload":2}"#.to_string()]
    );
}

#[tokio::test]
async fn closing_a_connection_unregisters_it() {
    let (addr, hub) = spawn_server(ConnectionSettings::default()).await;
    let mut a = connect(addr).await;
    let _b = connect(addr).await;
    wait_for_clients(&hub, 2).await;

    a.close(None).await.unwrap();
    wait_for_clients(&hub, 1).await;
}

#[tokio::test]
async fn dropping_a_socket_without_close_is_an_ordinary_disconnect() {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    // Current-thread runtime: the server tasks log through this subscriber.
    let _guard = tracing::subscriber::set_default(subscriber);

    let (addr, hub) = spawn_server(ConnectionSettings::default()).await;
    let a = connect(addr).await;
    wait_for_clients(&hub, 1).await;

    drop(a);
    wait_for_clients(&hub, 0).await;

    let output = logs.contents();
    assert!(
        output.contains("connection reset without closing handshake"),
        "{output}"
    );
    assert!(!output.contains("unexpectedly"), "{output}");
}

#[tokio::test]
async fn oversized_frames_end_the_session() {
    let (addr, hub) = spawn_server(ConnectionSettings::default()).await;
    let mut a = connect(addr).await;
    wait_for_clients(&hub, 1).await;

    let payload = "x".repeat(2000);
    let frame = format!(r#"{{"type":"move","payload":"{payload}"}}"#);
    // The server may tear the socket down before the write completes.
    let _ = a.send(Message::text(frame)).await;

    wait_for_clients(&hub, 0).await;
}

#[tokio::test]
async fn silent_peer_is_dropped_after_liveness_window() {
    let settings = ConnectionSettings {
        pong_wait: Duration::from_millis(300),
        ..ConnectionSettings::default()
    };
    let (addr, hub) = spawn_server(settings).await;

    // Never polled, so the client never answers pings.
    let _silent = connect(addr).await;
    wait_for_clients(&hub, 1).await;

    wait_for_clients(&hub, 0).await;
}

#[tokio::test]
async fn responsive_peer_survives_several_liveness_windows() {
    let settings = ConnectionSettings {
        pong_wait: Duration::from_millis(200),
        ..ConnectionSettings::default()
    };
    let (addr, hub) = spawn_server(settings).await;
    let mut a = connect(addr).await;
    wait_for_clients(&hub, 1).await;

    // Polling the stream lets the client answer pings with pongs.
    assert!(
        tokio::time::timeout(Duration::from_millis(800), next_text(&mut a))
            .await
            .is_err()
    );
    assert_eq!(hub.client_count().await.unwrap(), 1);
}

#[tokio::test]
async fn server_broadcast_reaches_everyone() {
    let (addr, hub) = spawn_server(ConnectionSettings::default()).await;
    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    wait_for_clients(&hub, 2).await;

    let frame = r#"{"type":"match_started","payload":{"id":"m-1"}}"#;
    hub.broadcast(frame.into()).await.unwrap();

    assert_eq!(next_frames(&mut a, 1).await, vec![frame.to_string()]);
    assert_eq!(next_frames(&mut b, 1).await, vec![frame.to_string()]);
}

#[tokio::test]
async fn health_reports_live_connections() {
    let (addr, hub) = spawn_server(ConnectionSettings::default()).await;
    let _a = connect(addr).await;
    wait_for_clients(&hub, 1).await;

    let response = reqwest::get(format!("http://{addr}/api/health"))
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "tictactoe-relay");
    assert_eq!(body["connections"], 1);
}

#[tokio::test]
async fn plain_get_on_ws_is_rejected() {
    let app = build_app(AppState {
        hub: Hub::start(8),
        connection: ConnectionSettings::default(),
    });

    let response = app
        .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn health_is_served_in_process() {
    let app = build_app(AppState {
        hub: Hub::start(8),
        connection: ConnectionSettings::default(),
    });

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["connections"], 0);
}
