//! Observer socket lifecycle
//!
//! Each connection gets the full canvas and the observer count up front,
//! then a select loop multiplexes client requests, hub broadcasts, and (in
//! session mode) the authentication deadline.

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::Extension,
    response::IntoResponse,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use plaza_core::{encode_canvas, PlacementGateway};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::server::{ServerContext, SurfaceMode};

use super::hub::BroadcastHub;
use super::protocol::{ClientMessage, ServerMessage};

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Extension(gateway): Extension<Arc<PlacementGateway>>,
    Extension(hub): Extension<Arc<BroadcastHub>>,
    Extension(context): Extension<ServerContext>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, gateway, hub, context))
}

/// Handle one observer connection
async fn handle_socket(
    socket: WebSocket,
    gateway: Arc<PlacementGateway>,
    hub: Arc<BroadcastHub>,
    context: ServerContext,
) {
    let socket_id = Uuid::new_v4();
    info!(socket = %socket_id, "observer socket established");

    let (mut sender, mut receiver) = socket.split();

    // Initial state push: the canvas, then the observer count via the hub.
    match gateway.canvas_snapshot().await {
        Ok(snapshot) => {
            let state =
                ServerMessage::canvas_state(encode_canvas(&snapshot.buffer), snapshot.version);
            if !send_message(&mut sender, &state).await {
                return;
            }
        }
        Err(e) => {
            // The observer still gets live updates and may retry get_canvas.
            warn!(socket = %socket_id, error = %e, "initial canvas push failed");
            if !send_message(&mut sender, &ServerMessage::from_error(&e)).await {
                return;
            }
        }
    }

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<ServerMessage>();
    hub.register(socket_id, tx);
    hub.broadcast_count();

    let mut session_token: Option<String> = None;

    let auth_deadline = tokio::time::sleep(context.auth_timeout);
    tokio::pin!(auth_deadline);

    loop {
        tokio::select! {
            // Client requests
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let (reply, close) = match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(request) => {
                                handle_client_message(
                                    request,
                                    &gateway,
                                    context.mode,
                                    &mut session_token,
                                )
                                .await
                            }
                            Err(e) => (
                                Some(ServerMessage::invalid(format!(
                                    "Invalid message format: {e}"
                                ))),
                                false,
                            ),
                        };
                        if let Some(reply) = reply {
                            if !send_message(&mut sender, &reply).await {
                                break;
                            }
                        }
                        if close {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(socket = %socket_id, "observer closed the socket");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sender.send(Message::Pong(data)).await;
                    }
                    Some(Err(e)) => {
                        debug!(socket = %socket_id, error = %e, "socket read failed");
                        break;
                    }
                    None => break,
                    _ => {}
                }
            }
            // Hub broadcasts (pixel updates, observer counts)
            broadcast = rx.recv() => {
                match broadcast {
                    Some(message) => {
                        if !send_message(&mut sender, &message).await {
                            break;
                        }
                    }
                    None => break,
                }
            }
            // Session sockets must authenticate before the deadline.
            _ = &mut auth_deadline,
                if context.mode == SurfaceMode::Session && session_token.is_none() =>
            {
                debug!(socket = %socket_id, "authentication deadline passed");
                let message = ServerMessage::auth_error("authentication deadline passed");
                send_message(&mut sender, &message).await;
                break;
            }
        }
    }

    let _ = sender.close().await;
    hub.unregister(&socket_id);
    hub.broadcast_count();
    info!(socket = %socket_id, "observer socket ended");
}

/// Serialize and send one frame. Returns false once the socket is gone.
async fn send_message(sender: &mut SplitSink<WebSocket, Message>, message: &ServerMessage) -> bool {
    match serde_json::to_string(message) {
        Ok(json) => sender.send(Message::Text(json)).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "failed to serialize server message");
            true
        }
    }
}

/// Handle one parsed client request.
///
/// Returns the direct reply (if any) and whether the socket must close.
/// Accepted placements produce no direct reply: the socket sees its own
/// pixel through the same broadcast every other observer gets.
async fn handle_client_message(
    message: ClientMessage,
    gateway: &PlacementGateway,
    mode: SurfaceMode,
    session_token: &mut Option<String>,
) -> (Option<ServerMessage>, bool) {
    match message {
        ClientMessage::Ping => (Some(ServerMessage::pong()), false),

        ClientMessage::GetCanvas => match gateway.canvas_snapshot().await {
            Ok(snapshot) => (
                Some(ServerMessage::canvas_state(
                    encode_canvas(&snapshot.buffer),
                    snapshot.version,
                )),
                false,
            ),
            Err(e) => (Some(ServerMessage::from_error(&e)), false),
        },

        ClientMessage::Authenticate { token } => {
            if mode != SurfaceMode::Session {
                return (
                    Some(ServerMessage::not_supported(
                        "authenticate is a session-mode request",
                    )),
                    false,
                );
            }
            match gateway.resolve_session(&token).await {
                Ok(session) => {
                    *session_token = Some(token);
                    (
                        Some(ServerMessage::Authenticated {
                            user_id: session.user_id,
                            username: session.username,
                        }),
                        false,
                    )
                }
                Err(e) => (Some(ServerMessage::auth_error(e.to_string())), true),
            }
        }

        ClientMessage::PlacePixel { x, y, color } => {
            if mode != SurfaceMode::Session {
                return (
                    Some(ServerMessage::not_supported(
                        "placements go through the REST surface in agent mode",
                    )),
                    false,
                );
            }
            let Some(token) = session_token.as_deref() else {
                return (
                    Some(ServerMessage::Error {
                        message: "authenticate before placing pixels".to_string(),
                        code: "UNAUTHENTICATED",
                    }),
                    false,
                );
            };
            match gateway.place_for_session(token, x, y, color).await {
                Ok(_) => (None, false),
                Err(e) => (Some(ServerMessage::from_error(&e)), false),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plaza_core::{
        CanvasSpec, CooldownGate, MemoryDirectory, MemoryStore, SessionRecord, Throttle,
        WriterDirectory,
    };
    use std::time::Duration;

    async fn session_gateway() -> Arc<PlacementGateway> {
        let spec = CanvasSpec::new(8, 8, 16).unwrap();
        let store = Arc::new(MemoryStore::new(spec));
        let directory = Arc::new(MemoryDirectory::new());
        directory
            .insert_session(
                "tok-1",
                &SessionRecord {
                    user_id: "u1".to_string(),
                    username: "Observer One".to_string(),
                    spectator: false,
                    cooldown_seconds: None,
                },
            )
            .await
            .unwrap();
        let throttle = Throttle::Cooldown(CooldownGate::new(
            store.clone(),
            Duration::from_secs(30),
        ));
        Arc::new(PlacementGateway::new(spec, store, directory, throttle))
    }

    #[tokio::test]
    async fn test_ping_answers_pong() {
        let gateway = session_gateway().await;
        let mut token = None;
        let (reply, close) = handle_client_message(
            ClientMessage::Ping,
            &gateway,
            SurfaceMode::Agent,
            &mut token,
        )
        .await;
        assert!(matches!(reply, Some(ServerMessage::Pong { .. })));
        assert!(!close);
    }

    #[tokio::test]
    async fn test_get_canvas_returns_state() {
        let gateway = session_gateway().await;
        let mut token = None;
        let (reply, close) = handle_client_message(
            ClientMessage::GetCanvas,
            &gateway,
            SurfaceMode::Agent,
            &mut token,
        )
        .await;
        match reply {
            Some(ServerMessage::CanvasState {
                format, version, ..
            }) => {
                assert_eq!(format, "full");
                assert_eq!(version, 0);
            }
            other => panic!("unexpected reply: {other:?}"),
        }
        assert!(!close);
    }

    #[tokio::test]
    async fn test_authenticate_rejected_in_agent_mode() {
        let gateway = session_gateway().await;
        let mut token = None;
        let (reply, close) = handle_client_message(
            ClientMessage::Authenticate {
                token: "tok-1".to_string(),
            },
            &gateway,
            SurfaceMode::Agent,
            &mut token,
        )
        .await;
        match reply {
            Some(ServerMessage::Error { code, .. }) => assert_eq!(code, "NOT_SUPPORTED"),
            other => panic!("unexpected reply: {other:?}"),
        }
        assert!(!close);
        assert!(token.is_none());
    }

    #[tokio::test]
    async fn test_authenticate_accepts_known_token() {
        let gateway = session_gateway().await;
        let mut token = None;
        let (reply, close) = handle_client_message(
            ClientMessage::Authenticate {
                token: "tok-1".to_string(),
            },
            &gateway,
            SurfaceMode::Session,
            &mut token,
        )
        .await;
        match reply {
            Some(ServerMessage::Authenticated { user_id, username }) => {
                assert_eq!(user_id, "u1");
                assert_eq!(username, "Observer One");
            }
            other => panic!("unexpected reply: {other:?}"),
        }
        assert!(!close);
        assert_eq!(token.as_deref(), Some("tok-1"));
    }

    #[tokio::test]
    async fn test_authenticate_unknown_token_closes() {
        let gateway = session_gateway().await;
        let mut token = None;
        let (reply, close) = handle_client_message(
            ClientMessage::Authenticate {
                token: "tok-bogus".to_string(),
            },
            &gateway,
            SurfaceMode::Session,
            &mut token,
        )
        .await;
        assert!(matches!(reply, Some(ServerMessage::AuthError { .. })));
        assert!(close);
        assert!(token.is_none());
    }

    #[tokio::test]
    async fn test_place_pixel_requires_authentication() {
        let gateway = session_gateway().await;
        let mut token = None;
        let (reply, close) = handle_client_message(
            ClientMessage::PlacePixel { x: 1, y: 1, color: 2 },
            &gateway,
            SurfaceMode::Session,
            &mut token,
        )
        .await;
        match reply {
            Some(ServerMessage::Error { code, .. }) => assert_eq!(code, "UNAUTHENTICATED"),
            other => panic!("unexpected reply: {other:?}"),
        }
        assert!(!close);
    }

    #[tokio::test]
    async fn test_place_pixel_not_supported_in_agent_mode() {
        let gateway = session_gateway().await;
        let mut token = Some("tok-1".to_string());
        let (reply, _) = handle_client_message(
            ClientMessage::PlacePixel { x: 1, y: 1, color: 2 },
            &gateway,
            SurfaceMode::Agent,
            &mut token,
        )
        .await;
        match reply {
            Some(ServerMessage::Error { code, .. }) => assert_eq!(code, "NOT_SUPPORTED"),
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_accepted_placement_has_no_direct_reply() {
        let gateway = session_gateway().await;
        let mut subscription = gateway.subscribe();
        let mut token = Some("tok-1".to_string());

        let (reply, close) = handle_client_message(
            ClientMessage::PlacePixel { x: 3, y: 4, color: 7 },
            &gateway,
            SurfaceMode::Session,
            &mut token,
        )
        .await;
        assert!(reply.is_none());
        assert!(!close);

        // The pixel reaches observers through the broadcast path instead.
        let update = subscription.recv().await.unwrap();
        assert_eq!((update.x, update.y, update.color), (3, 4, 7));
        assert_eq!(update.actor_id, "u1");

        // Read-back confirms the write landed.
        assert_eq!(gateway.read_cell(3, 4).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_rejected_placement_reports_gateway_code() {
        let gateway = session_gateway().await;
        let mut token = Some("tok-1".to_string());

        let (reply, _) = handle_client_message(
            ClientMessage::PlacePixel { x: 99, y: 0, color: 2 },
            &gateway,
            SurfaceMode::Session,
            &mut token,
        )
        .await;
        match reply {
            Some(ServerMessage::Error { code, .. }) => assert_eq!(code, "INVALID_COORDINATES"),
            other => panic!("unexpected reply: {other:?}"),
        }

        // Cooldown from an accepted write rejects the follow-up.
        handle_client_message(
            ClientMessage::PlacePixel { x: 1, y: 1, color: 2 },
            &gateway,
            SurfaceMode::Session,
            &mut token,
        )
        .await;
        let (reply, _) = handle_client_message(
            ClientMessage::PlacePixel { x: 2, y: 2, color: 3 },
            &gateway,
            SurfaceMode::Session,
            &mut token,
        )
        .await;
        match reply {
            Some(ServerMessage::Error { code, .. }) => assert_eq!(code, "COOLDOWN_ACTIVE"),
            other => panic!("unexpected reply: {other:?}"),
        }
    }
}
