use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::auth;
use crate::events::{RoomRegistry, tenant_room, user_room};

use crate::api::error::ApiError;
use crate::api::state::AppState;

#[derive(Deserialize)]
pub struct WsQuery {
    /// Browsers cannot set headers on WebSocket upgrades; accept the
    /// bearer token as a query parameter too.
    pub token: Option<String>,
}

pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.to_string())
        .or(query.token)
        .ok_or_else(|| ApiError::unauthorized("missing token"))?;

    let claims = auth::verify_token(&token, &state.platform.auth_secret, "access")
        .map_err(|_| ApiError::unauthorized("invalid or expired token"))?;

    Ok(ws.on_upgrade(move |socket| handle_socket(state, claims.sub, claims.tid, socket)))
}

/// Rooms a session may join: its own user room and its tenant room.
fn room_allowed(room: &str, user_id: &str, tenant_id: &str) -> bool {
    room == user_room(user_id) || room == tenant_room(tenant_id)
}

fn spawn_forwarder(
    rooms: &RoomRegistry,
    room: String,
    out_tx: mpsc::Sender<String>,
) -> JoinHandle<()> {
    let mut rx = rooms.subscribe(&room);
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let frame = json!({ "type": "event", "room": room, "event": event });
                    if out_tx.send(frame.to_string()).await.is_err() {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    let frame = json!({ "type": "lagged", "room": room, "missed": missed });
                    if out_tx.send(frame.to_string()).await.is_err() {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[derive(Deserialize)]
struct ClientFrame {
    #[serde(rename = "type")]
    frame_type: String,
    room: Option<String>,
    ack_id: Option<serde_json::Value>,
}

async fn handle_socket(state: AppState, user_id: String, tenant_id: String, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<String>(64);

    let send_task = tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let rooms = state.platform.events.rooms().clone();
    let mut forwarders: HashMap<String, JoinHandle<()>> = HashMap::new();
    for room in [user_room(&user_id), tenant_room(&tenant_id)] {
        forwarders.insert(room.clone(), spawn_forwarder(&rooms, room, out_tx.clone()));
    }

    while let Some(Ok(message)) = stream.next().await {
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let Ok(frame) = serde_json::from_str::<ClientFrame>(text.as_str()) else {
            let _ = out_tx
                .send(json!({ "type": "error", "error": "malformed frame" }).to_string())
                .await;
            continue;
        };

        let reply = match frame.frame_type.as_str() {
            "join_room" => match frame.room {
                Some(room) if room_allowed(&room, &user_id, &tenant_id) => {
                    forwarders
                        .entry(room.clone())
                        .or_insert_with(|| spawn_forwarder(&rooms, room.clone(), out_tx.clone()));
                    json!({ "type": "joined", "room": room, "ack_id": frame.ack_id })
                }
                Some(room) => {
                    json!({ "type": "error", "error": format!("room {room} not permitted") })
                }
                None => json!({ "type": "error", "error": "join_room requires a room" }),
            },
            "leave_room" => match frame.room {
                Some(room) => {
                    if let Some(handle) = forwarders.remove(&room) {
                        handle.abort();
                    }
                    json!({ "type": "left", "room": room, "ack_id": frame.ack_id })
                }
                None => json!({ "type": "error", "error": "leave_room requires a room" }),
            },
            "ping" => json!({ "type": "pong", "ack_id": frame.ack_id }),
            other => json!({ "type": "error", "error": format!("unknown frame type {other}") }),
        };
        if out_tx.send(reply.to_string()).await.is_err() {
            break;
        }
    }

    for handle in forwarders.into_values() {
        handle.abort();
    }
    send_task.abort();
}
