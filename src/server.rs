//! WebSocket hub server: connection lifecycle, event dispatch, and the two
//! signaling relays.
//!
//! Every client holds one full-duplex WebSocket connection carrying named
//! JSON events. The upgrade request's `userId` query parameter (already
//! authenticated upstream) binds the connection to a user identity; the
//! connection itself is addressed by a server-assigned uuid.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use hyper_tungstenite::tungstenite::Message;
use log::{debug, error, info, warn};
use tokio::sync::mpsc;

use crate::messages::{ClientMessage, ServerMessage};
use crate::state::rooms::LeaveOutcome;
use crate::state::HubState;
use crate::{ConnId, UserId};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Address to bind to.
    pub bind_addr: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:4000".to_string(),
        }
    }
}

/// The signaling hub server.
pub struct SignalingHub {
    config: HubConfig,
    state: Arc<HubState>,
}

impl SignalingHub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            config,
            state: Arc::new(HubState::new()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(HubConfig::default())
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    /// Start serving. Runs the accept loop until the server errors out.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let addr: SocketAddr = self.config.bind_addr.parse()?;
        let state = self.state.clone();

        let make_svc = make_service_fn(move |_conn| {
            let state = state.clone();
            async move {
                Ok::<_, hyper::Error>(service_fn(move |req| {
                    let state = state.clone();
                    handle_request(req, state)
                }))
            }
        });

        let server = Server::bind(&addr).serve(make_svc);
        info!("Signaling hub listening on http://{}", addr);
        info!("WebSocket endpoint: ws://{}/?userId=<id>", addr);

        server.await?;
        Ok(())
    }
}

async fn handle_request(
    mut req: Request<Body>,
    state: Arc<HubState>,
) -> Result<Response<Body>, hyper::Error> {
    // CORS preflight (needed for browser fetch from the React frontend)
    if req.method() == Method::OPTIONS {
        return Ok(Response::builder()
            .status(StatusCode::NO_CONTENT)
            .header("Access-Control-Allow-Origin", "*")
            .header("Access-Control-Allow-Methods", "GET, OPTIONS")
            .header("Access-Control-Allow-Headers", "Content-Type")
            .header("Access-Control-Max-Age", "86400")
            .body(Body::empty())
            .unwrap());
    }

    // Health check endpoint
    if req.uri().path() == "/health" {
        return Ok(Response::builder()
            .status(StatusCode::OK)
            .header("Access-Control-Allow-Origin", "*")
            .body(Body::from("ok"))
            .unwrap());
    }

    // WebSocket upgrade
    if hyper_tungstenite::is_upgrade_request(&req) {
        let user_id = user_id_from_query(req.uri().query());
        match hyper_tungstenite::upgrade(&mut req, None) {
            Ok((response, websocket)) => {
                tokio::spawn(async move {
                    match websocket.await {
                        Ok(ws) => handle_connection(ws, user_id, state).await,
                        Err(e) => error!("WebSocket handshake failed: {}", e),
                    }
                });
                return Ok(response);
            }
            Err(e) => {
                error!("WebSocket upgrade error: {}", e);
                return Ok(Response::builder()
                    .status(StatusCode::BAD_REQUEST)
                    .body(Body::from("Invalid WebSocket upgrade request"))
                    .unwrap());
            }
        }
    }

    Ok(Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(Body::from(
            "Not found. Use /health for health check or upgrade to WebSocket.",
        ))
        .unwrap())
}

/// Extract the authenticated user id from the handshake query string.
/// Empty values and the literal "undefined" (an unauthenticated client)
/// register no presence.
fn user_id_from_query(query: Option<&str>) -> Option<UserId> {
    let raw = query?
        .split('&')
        .find(|p| p.starts_with("userId="))
        .map(|p| &p[7..])?;
    let decoded = match urlencoding::decode(raw) {
        Ok(s) => s.into_owned(),
        Err(_) => raw.to_string(),
    };
    if decoded.is_empty() || decoded == "undefined" {
        return None;
    }
    Some(decoded)
}

async fn handle_connection(
    ws: hyper_tungstenite::WebSocketStream<hyper::upgrade::Upgraded>,
    user_id: Option<UserId>,
    state: Arc<HubState>,
) {
    let conn_id: ConnId = uuid::Uuid::new_v4().to_string();
    let (mut ws_sender, mut ws_receiver) = ws.split();

    // Channel drained by the send task; everything outbound goes through it
    // so delivery never blocks a dispatch path.
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    state
        .connections
        .lock()
        .await
        .insert(conn_id.clone(), tx.clone());

    match &user_id {
        Some(uid) => info!("Connection {} established for user {}", conn_id, uid),
        None => info!("Anonymous connection {} established", conn_id),
    }

    // Presence registration, then the online-list broadcast to everyone.
    let users = {
        let mut presence = state.presence.lock().await;
        if let Some(uid) = &user_id {
            presence.register(uid.clone(), conn_id.clone());
        }
        presence.snapshot()
    };
    state
        .connections
        .lock()
        .await
        .broadcast(&ServerMessage::GetOnlineUsers { users });

    loop {
        tokio::select! {
            msg_result = ws_receiver.next() => {
                match msg_result {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(msg) => {
                                dispatch(msg, &conn_id, user_id.as_deref(), &state).await;
                            }
                            Err(e) => {
                                warn!("Failed to parse message on {}: {}", conn_id, e);
                                let error_msg = ServerMessage::Error {
                                    message: format!("Invalid message format: {}", e),
                                };
                                if let Ok(json) = serde_json::to_string(&error_msg) {
                                    let _ = tx.send(Message::Text(json));
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Connection {} closed by client", conn_id);
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = tx.send(Message::Pong(data));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!("WebSocket error on {}: {}", conn_id, e);
                        break;
                    }
                    None => break,
                }
            }
            _ = &mut send_task => {
                break;
            }
        }
    }

    handle_disconnect(&conn_id, &state).await;
    send_task.abort();
}

/// Route one inbound event to the owning registry and deliver the resulting
/// forwards. Addressing failures end in a targeted response event or a
/// silent drop; nothing here can fail another connection.
async fn dispatch(msg: ClientMessage, conn_id: &str, user_id: Option<&str>, state: &Arc<HubState>) {
    match msg {
        ClientMessage::CallUser {
            user_to_call,
            signal,
            call_type,
        } => {
            let Some(caller) = user_id else {
                debug!("call-user from anonymous connection {} dropped", conn_id);
                return;
            };
            let target = state.presence.lock().await.lookup(&user_to_call);
            let conns = state.connections.lock().await;
            match target {
                Some(target_conn) => {
                    info!("Forwarding {} call from {} to {}", call_type, caller, user_to_call);
                    conns.send(
                        &target_conn,
                        &ServerMessage::CallReceived {
                            from: caller.to_string(),
                            signal,
                            call_type,
                        },
                    );
                }
                None => {
                    info!("Call from {} to {} failed: offline", caller, user_to_call);
                    conns.send(
                        conn_id,
                        &ServerMessage::CallFailed {
                            reason: "offline".to_string(),
                        },
                    );
                }
            }
        }

        ClientMessage::CallAccepted { to, signal } => {
            let Some(accepter) = user_id else {
                debug!("call-accepted from anonymous connection {} dropped", conn_id);
                return;
            };
            let target = state.presence.lock().await.lookup(&to);
            // Caller already gone: the callee has no further action to take.
            if let Some(target_conn) = target {
                info!("Forwarding call accept from {} to {}", accepter, to);
                state.connections.lock().await.send(
                    &target_conn,
                    &ServerMessage::CallAccepted {
                        from: accepter.to_string(),
                        signal,
                    },
                );
            }
        }

        ClientMessage::CallRejected { to } => {
            let target = state.presence.lock().await.lookup(&to);
            if let Some(target_conn) = target {
                state
                    .connections
                    .lock()
                    .await
                    .send(&target_conn, &ServerMessage::CallRejected);
            }
        }

        ClientMessage::EndCall { to, is_group } => {
            if is_group {
                let participants = state.rooms.lock().await.teardown(&to);
                if !participants.is_empty() {
                    info!("Group call ended, room {} closed", to);
                }
                state
                    .connections
                    .lock()
                    .await
                    .send_many(&participants, &ServerMessage::CallEnded);
            } else {
                let target = state.presence.lock().await.lookup(&to);
                if let Some(target_conn) = target {
                    state
                        .connections
                        .lock()
                        .await
                        .send(&target_conn, &ServerMessage::CallEnded);
                }
            }
        }

        ClientMessage::CreateVideoRoom {
            user_id: creator_id,
            user_name,
        } => {
            let room = state.rooms.lock().await.create(
                creator_id.clone(),
                user_name,
                conn_id.to_string(),
            );
            info!("User {} created room {}", creator_id, room.room_id);
            state
                .connections
                .lock()
                .await
                .send(conn_id, &ServerMessage::VideoRoomCreated { room });
        }

        ClientMessage::CheckVideoRoom { room_id } => {
            let exists = state.rooms.lock().await.check(&room_id);
            state
                .connections
                .lock()
                .await
                .send(conn_id, &ServerMessage::VideoRoomCheckResult { room_id, exists });
        }

        ClientMessage::JoinRoom {
            room_id,
            user_id: joiner_id,
            user_name,
        } => {
            let result = state.rooms.lock().await.join(
                &room_id,
                joiner_id.clone(),
                user_name.clone(),
                conn_id.to_string(),
            );
            match result {
                Ok(outcome) => {
                    let conns = state.connections.lock().await;
                    if !outcome.rejoined {
                        info!("User {} joined room {}", joiner_id, room_id);
                        conns.send_many(
                            &outcome.notify,
                            &ServerMessage::UserJoined {
                                user_id: joiner_id,
                                user_name,
                            },
                        );
                    }
                    conns.send(conn_id, &ServerMessage::RoomInfo { room: outcome.snapshot });
                }
                Err(e) => {
                    info!("Join of room {} by {} rejected: {}", room_id, joiner_id, e);
                    state.connections.lock().await.send(
                        conn_id,
                        &ServerMessage::RoomJoinError {
                            message: e.to_string(),
                        },
                    );
                }
            }
        }

        ClientMessage::LeaveRoom {
            room_id,
            user_id: leaver_id,
        } => {
            let outcome = state.rooms.lock().await.leave(&room_id, &leaver_id);
            if let Some(outcome) = outcome {
                info!("User {} left room {}", leaver_id, room_id);
                deliver_leave(&room_id, outcome, state).await;
            }
        }

        ClientMessage::SendingSignal {
            user_to_signal,
            signal,
            caller_id,
        } => {
            let target = state.rooms.lock().await.offer_target(&user_to_signal);
            // Counterpart already left the room: drop.
            if let Some(target_conn) = target {
                state
                    .connections
                    .lock()
                    .await
                    .send(&target_conn, &ServerMessage::ReceivingSignal { signal, caller_id });
            }
        }

        ClientMessage::ReturningSignal { signal, caller_id } => {
            let Some(answerer) = user_id else {
                debug!("returning-signal from anonymous connection {} dropped", conn_id);
                return;
            };
            let target = state.rooms.lock().await.answer_target(answerer, &caller_id);
            if let Some(target_conn) = target {
                state
                    .connections
                    .lock()
                    .await
                    .send(&target_conn, &ServerMessage::ReturningSignal { signal, caller_id });
            }
        }
    }
}

/// Disconnect sequence. The user is resolved *before* unregistering so a
/// stale disconnect (presence already re-pointed at a newer connection)
/// touches neither presence nor any room.
async fn handle_disconnect(conn_id: &str, state: &Arc<HubState>) {
    state.connections.lock().await.remove(conn_id);

    let (resolved, users) = {
        let mut presence = state.presence.lock().await;
        let resolved = presence.resolve(conn_id);
        if resolved.is_some() {
            presence.unregister(conn_id);
        }
        (resolved, presence.snapshot())
    };
    state
        .connections
        .lock()
        .await
        .broadcast(&ServerMessage::GetOnlineUsers { users });

    let Some(user_id) = resolved else {
        info!("Connection {} disconnected", conn_id);
        return;
    };
    info!("Connection {} for user {} disconnected", conn_id, user_id);

    let cleanup = state.rooms.lock().await.disconnect_cleanup(&user_id);
    if let Some((room_id, outcome)) = cleanup {
        deliver_leave(&room_id, outcome, state).await;
    }
}

/// Broadcasts owed after a participant left, shared by the explicit leave
/// and the disconnect cleanup so both paths are observably identical.
async fn deliver_leave(room_id: &str, outcome: LeaveOutcome, state: &Arc<HubState>) {
    let conns = state.connections.lock().await;
    conns.send_many(
        &outcome.remaining,
        &ServerMessage::UserLeft {
            user_id: outcome.user_id,
            user_name: outcome.user_name,
        },
    );
    if outcome.closed {
        conns.send_many(&outcome.remaining, &ServerMessage::RoomClosed);
        info!("Room {} closed", room_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hub_config_default() {
        let config = HubConfig::default();
        assert_eq!(config.bind_addr, "0.0.0.0:4000");
    }

    #[test]
    fn test_hub_creation() {
        let hub = SignalingHub::with_defaults();
        assert_eq!(hub.bind_addr(), "0.0.0.0:4000");
    }

    #[test]
    fn test_user_id_from_query() {
        assert_eq!(user_id_from_query(Some("userId=alice")), Some("alice".to_string()));
        assert_eq!(
            user_id_from_query(Some("token=x&userId=alice")),
            Some("alice".to_string())
        );
        assert_eq!(
            user_id_from_query(Some("userId=user%40example.com")),
            Some("user@example.com".to_string())
        );
    }

    #[test]
    fn test_user_id_from_query_anonymous_cases() {
        assert_eq!(user_id_from_query(None), None);
        assert_eq!(user_id_from_query(Some("")), None);
        assert_eq!(user_id_from_query(Some("token=x")), None);
        assert_eq!(user_id_from_query(Some("userId=")), None);
        // Unauthenticated browser clients send the literal string.
        assert_eq!(user_id_from_query(Some("userId=undefined")), None);
    }
}
