//! End-to-end observer socket tests.
//!
//! Each test binds a real server on an ephemeral port over the in-memory
//! store and drives it with a tokio-tungstenite client, so the upgrade
//! path, the select loop, and the hub fan-out are all exercised together.

use axum::{Extension, Router};
use futures_util::{SinkExt, StreamExt};
use plaza_core::{
    register_writer, CanvasSpec, CooldownGate, MemoryDirectory, MemoryStore, PlacementGateway,
    SessionRecord, Throttle, WriterDirectory,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::server::{ServerContext, SurfaceMode};
use crate::websocket::{websocket_routes, BroadcastHub};

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

struct TestServer {
    url: String,
    gateway: Arc<PlacementGateway>,
    agent_key: String,
}

async fn spawn_server(mode: SurfaceMode, auth_timeout: Duration) -> TestServer {
    let spec = CanvasSpec::new(8, 8, 16).unwrap();
    let store = Arc::new(MemoryStore::new(spec));
    let directory = Arc::new(MemoryDirectory::new());

    let agent_key = register_writer(directory.as_ref(), "bot-1", "Painter Bot")
        .await
        .unwrap();
    directory
        .insert_session(
            "tok-live",
            &SessionRecord {
                user_id: "u1".to_string(),
                username: "Live One".to_string(),
                spectator: false,
                cooldown_seconds: None,
            },
        )
        .await
        .unwrap();

    let throttle = Throttle::Cooldown(CooldownGate::new(store.clone(), Duration::ZERO));
    let gateway = Arc::new(PlacementGateway::new(spec, store, directory, throttle));
    let hub = BroadcastHub::start(gateway.subscribe());

    let context = ServerContext {
        started: Instant::now(),
        mode,
        auth_timeout,
    };

    let app = Router::new()
        .merge(websocket_routes())
        .layer(Extension(gateway.clone()))
        .layer(Extension(hub))
        .layer(Extension(context));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        url: format!("ws://{addr}/ws"),
        gateway,
        agent_key,
    }
}

async fn connect(url: &str) -> Socket {
    let (socket, _) = connect_async(url).await.unwrap();
    socket
}

async fn next_json(socket: &mut Socket) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), socket.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket ended")
            .expect("socket error");
        if let WsMessage::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn send_json(socket: &mut Socket, text: &str) {
    socket.send(WsMessage::Text(text.to_string())).await.unwrap();
}

/// Drain the canvas_state + connection_count frames every connect produces.
async fn drain_connect_frames(socket: &mut Socket) {
    let first = next_json(socket).await;
    assert_eq!(first["type"], "canvas_state");
    let second = next_json(socket).await;
    assert_eq!(second["type"], "connection_count");
}

#[tokio::test]
async fn test_connect_pushes_canvas_then_count() {
    let server = spawn_server(SurfaceMode::Agent, Duration::from_secs(10)).await;
    let mut socket = connect(&server.url).await;

    let canvas = next_json(&mut socket).await;
    assert_eq!(canvas["type"], "canvas_state");
    assert_eq!(canvas["payload"]["format"], "full");
    assert_eq!(canvas["payload"]["version"], 0);
    let spec = CanvasSpec::new(8, 8, 16).unwrap();
    let data = canvas["payload"]["data"].as_str().unwrap();
    let buffer = plaza_core::decode_canvas(&spec, data).unwrap();
    assert_eq!(buffer.len(), spec.buffer_len());

    let count = next_json(&mut socket).await;
    assert_eq!(count["type"], "connection_count");
    assert_eq!(count["payload"]["count"], 1);
}

#[tokio::test]
async fn test_ping_pong_over_wire() {
    let server = spawn_server(SurfaceMode::Agent, Duration::from_secs(10)).await;
    let mut socket = connect(&server.url).await;
    drain_connect_frames(&mut socket).await;

    send_json(&mut socket, r#"{"type":"ping"}"#).await;
    let pong = next_json(&mut socket).await;
    assert_eq!(pong["type"], "pong");
    assert!(pong["payload"]["server_time"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn test_accepted_placement_fans_out_to_observers() {
    let server = spawn_server(SurfaceMode::Agent, Duration::from_secs(10)).await;
    let mut socket = connect(&server.url).await;
    drain_connect_frames(&mut socket).await;

    server
        .gateway
        .place_pixel(&server.agent_key, 5, 6, 12)
        .await
        .unwrap();

    let update = next_json(&mut socket).await;
    assert_eq!(update["type"], "pixel_update");
    assert_eq!(update["payload"]["x"], 5);
    assert_eq!(update["payload"]["y"], 6);
    assert_eq!(update["payload"]["color"], 12);
    assert_eq!(update["payload"]["actor_name"], "Painter Bot");
}

#[tokio::test]
async fn test_observer_counts_track_connects_and_disconnects() {
    let server = spawn_server(SurfaceMode::Agent, Duration::from_secs(10)).await;

    let mut first = connect(&server.url).await;
    drain_connect_frames(&mut first).await;

    let mut second = connect(&server.url).await;
    let canvas = next_json(&mut second).await;
    assert_eq!(canvas["type"], "canvas_state");
    let count = next_json(&mut second).await;
    assert_eq!(count["payload"]["count"], 2);

    // The first observer sees the count change too.
    let bumped = next_json(&mut first).await;
    assert_eq!(bumped["type"], "connection_count");
    assert_eq!(bumped["payload"]["count"], 2);

    second.close(None).await.unwrap();
    let dropped = next_json(&mut first).await;
    assert_eq!(dropped["type"], "connection_count");
    assert_eq!(dropped["payload"]["count"], 1);
}

#[tokio::test]
async fn test_get_canvas_round_trip() {
    let server = spawn_server(SurfaceMode::Agent, Duration::from_secs(10)).await;
    let mut socket = connect(&server.url).await;
    drain_connect_frames(&mut socket).await;

    server
        .gateway
        .place_pixel(&server.agent_key, 0, 0, 3)
        .await
        .unwrap();
    // Skip the broadcast for the placement above.
    let update = next_json(&mut socket).await;
    assert_eq!(update["type"], "pixel_update");

    send_json(&mut socket, r#"{"type":"get_canvas"}"#).await;
    let state = next_json(&mut socket).await;
    assert_eq!(state["type"], "canvas_state");
    assert_eq!(state["payload"]["version"], 1);

    let spec = CanvasSpec::new(8, 8, 16).unwrap();
    let buffer =
        plaza_core::decode_canvas(&spec, state["payload"]["data"].as_str().unwrap()).unwrap();
    assert_eq!(spec.read_cell(&buffer, 0, 0).unwrap(), 3);
}

#[tokio::test]
async fn test_unknown_message_keeps_socket_open() {
    let server = spawn_server(SurfaceMode::Agent, Duration::from_secs(10)).await;
    let mut socket = connect(&server.url).await;
    drain_connect_frames(&mut socket).await;

    send_json(&mut socket, r#"{"type":"resize","payload":{"width":9}}"#).await;
    let error = next_json(&mut socket).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["payload"]["code"], "INVALID_MESSAGE");

    // Still serving requests afterwards.
    send_json(&mut socket, r#"{"type":"ping"}"#).await;
    assert_eq!(next_json(&mut socket).await["type"], "pong");
}

#[tokio::test]
async fn test_agent_mode_rejects_socket_placement() {
    let server = spawn_server(SurfaceMode::Agent, Duration::from_secs(10)).await;
    let mut socket = connect(&server.url).await;
    drain_connect_frames(&mut socket).await;

    send_json(
        &mut socket,
        r#"{"type":"place_pixel","payload":{"x":1,"y":1,"color":4}}"#,
    )
    .await;
    let error = next_json(&mut socket).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["payload"]["code"], "NOT_SUPPORTED");
}

#[tokio::test]
async fn test_session_authenticate_then_place() {
    let server = spawn_server(SurfaceMode::Session, Duration::from_secs(10)).await;
    let mut socket = connect(&server.url).await;
    drain_connect_frames(&mut socket).await;

    send_json(
        &mut socket,
        r#"{"type":"authenticate","payload":{"token":"tok-live"}}"#,
    )
    .await;
    let authed = next_json(&mut socket).await;
    assert_eq!(authed["type"], "authenticated");
    assert_eq!(authed["payload"]["user_id"], "u1");
    assert_eq!(authed["payload"]["username"], "Live One");

    send_json(
        &mut socket,
        r#"{"type":"place_pixel","payload":{"x":2,"y":3,"color":9}}"#,
    )
    .await;
    // No direct reply: the accepted pixel arrives as the shared broadcast.
    let update = next_json(&mut socket).await;
    assert_eq!(update["type"], "pixel_update");
    assert_eq!(update["payload"]["x"], 2);
    assert_eq!(update["payload"]["y"], 3);
    assert_eq!(update["payload"]["actor_id"], "u1");

    assert_eq!(server.gateway.read_cell(2, 3).await.unwrap(), 9);
}

#[tokio::test]
async fn test_session_unauthenticated_placement_rejected() {
    let server = spawn_server(SurfaceMode::Session, Duration::from_secs(10)).await;
    let mut socket = connect(&server.url).await;
    drain_connect_frames(&mut socket).await;

    send_json(
        &mut socket,
        r#"{"type":"place_pixel","payload":{"x":1,"y":1,"color":4}}"#,
    )
    .await;
    let error = next_json(&mut socket).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["payload"]["code"], "UNAUTHENTICATED");
}

#[tokio::test]
async fn test_bad_token_gets_auth_error_and_close() {
    let server = spawn_server(SurfaceMode::Session, Duration::from_secs(10)).await;
    let mut socket = connect(&server.url).await;
    drain_connect_frames(&mut socket).await;

    send_json(
        &mut socket,
        r#"{"type":"authenticate","payload":{"token":"tok-wrong"}}"#,
    )
    .await;
    let error = next_json(&mut socket).await;
    assert_eq!(error["type"], "auth_error");

    // The server closes after an auth failure.
    let end = tokio::time::timeout(Duration::from_secs(2), socket.next())
        .await
        .expect("expected the socket to close");
    match end {
        None | Some(Ok(WsMessage::Close(_))) => {}
        other => panic!("expected close, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_auth_deadline_closes_idle_session_socket() {
    let server = spawn_server(SurfaceMode::Session, Duration::from_millis(100)).await;
    let mut socket = connect(&server.url).await;
    drain_connect_frames(&mut socket).await;

    let error = next_json(&mut socket).await;
    assert_eq!(error["type"], "auth_error");

    let end = tokio::time::timeout(Duration::from_secs(2), socket.next())
        .await
        .expect("expected the socket to close");
    match end {
        None | Some(Ok(WsMessage::Close(_))) => {}
        other => panic!("expected close, got: {other:?}"),
    }
}
