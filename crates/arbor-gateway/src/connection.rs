//! The per-socket connection state machine.
//!
//! A connection is authenticated at the handshake (identity in the query
//! string), then moves `connected → joined(canvas) → disconnected`. Each
//! inbound intent builds its DTO from the socket's attached identity plus
//! the message body and calls the matching service method; the reply is
//! `<intent>_success` or `<intent>_error`. Disconnection runs the full leave
//! path for whatever canvas the socket was in.

use arbor_core::{CanvasId, CollabError, SessionId, UserId, UserInfo};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::Gateway;
use crate::frames::{ClientMessage, ServerFrame};

/// Identity presented at the WebSocket handshake.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WsQuery {
    user_id: Option<String>,
    user_name: Option<String>,
    user_email: Option<String>,
}

/// Upgrade handler for `/collaboration/ws`.
pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(gateway): State<Gateway>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, gateway, query))
}

async fn handle_socket(socket: WebSocket, gateway: Gateway, query: WsQuery) {
    let (mut sink, mut stream) = socket.split();

    // Missing identity: one error frame, then close.
    let (Some(user_id), Some(user_name)) = (query.user_id, query.user_name) else {
        let frame = ServerFrame::new(
            "error",
            serde_json::json!({
                "code": "INVALID_INPUT",
                "message": "userId and userName are required",
            }),
        );
        if let Ok(json) = serde_json::to_string(&frame) {
            let _ = sink.send(Message::Text(json.into())).await;
        }
        let _ = sink.close().await;
        return;
    };

    let user_id = UserId::new(user_id);
    let user = UserInfo::new(
        user_id.clone(),
        user_name,
        query.user_email.unwrap_or_default(),
    );
    let session_id = SessionId::new();

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerFrame>();
    gateway
        .rooms
        .register(session_id.clone(), user_id.clone(), out_tx.clone());

    let _ = out_tx.send(ServerFrame::new(
        "connected",
        serde_json::json!({ "sessionId": session_id, "user": user }),
    ));
    info!(session = %session_id, user = %user_id, "socket connected");

    // Writer half: frames queued for this connection go out in order.
    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let Ok(json) = serde_json::to_string(&frame) else {
                continue;
            };
            if sink.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    // Reader half: cancelled by the socket closing.
    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(m) => m,
            Err(err) => {
                debug!(%err, session = %session_id, "socket read error");
                break;
            },
        };
        match message {
            Message::Text(text) => {
                match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(intent) => {
                        dispatch(&gateway, &session_id, &user_id, &user, intent, &out_tx).await;
                    },
                    Err(err) => {
                        let _ = out_tx.send(ServerFrame::new(
                            "error",
                            serde_json::json!({
                                "code": "INVALID_INPUT",
                                "message": format!("unrecognized message: {err}"),
                            }),
                        ));
                    },
                }
            },
            Message::Close(_) => break,
            // Transport-level ping/pong and binary frames carry no intents.
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {},
        }
    }

    // Disconnected: leave whatever canvas the socket was in.
    if let Some(canvas_id) = gateway.rooms.unregister(&session_id) {
        if let Err(err) = gateway
            .collab
            .leave_canvas(canvas_id.clone(), user_id.clone())
            .await
        {
            warn!(%err, session = %session_id, canvas = %canvas_id, "leave on disconnect failed");
        }
    }
    writer.abort();
    info!(session = %session_id, user = %user_id, "socket disconnected");
}

/// Route one intent to its service call and queue the reply frame.
async fn dispatch(
    gateway: &Gateway,
    session_id: &SessionId,
    user_id: &UserId,
    user: &UserInfo,
    intent: ClientMessage,
    out: &mpsc::UnboundedSender<ServerFrame>,
) {
    let intent_name = intent.event_name();
    let result = handle_intent(gateway, session_id, user_id, user, intent).await;
    let frame = match result {
        Ok(data) => ServerFrame::success(intent_name, data),
        Err(err) => {
            if err.is_expected() {
                debug!(%err, intent = intent_name, session = %session_id, "intent rejected");
            } else {
                warn!(%err, intent = intent_name, session = %session_id, "intent failed");
            }
            ServerFrame::error(intent_name, &err)
        },
    };
    let _ = out.send(frame);
}

/// The canvas this connection has joined, or the error every canvas-scoped
/// intent shares.
fn joined_canvas(gateway: &Gateway, session_id: &SessionId) -> Result<CanvasId, CollabError> {
    gateway
        .rooms
        .canvas_of(session_id)
        .ok_or_else(|| CollabError::InvalidInput("join a canvas first".to_string()))
}

async fn handle_intent(
    gateway: &Gateway,
    session_id: &SessionId,
    user_id: &UserId,
    user: &UserInfo,
    intent: ClientMessage,
) -> Result<serde_json::Value, CollabError> {
    match intent {
        ClientMessage::JoinCanvas { canvas_id } => {
            let presence = gateway
                .collab
                .join_canvas(canvas_id.clone(), user_id.clone(), user.clone())
                .await?;
            gateway.rooms.join(session_id, canvas_id.clone());
            let snapshot = gateway.collab.get_canvas_presence(canvas_id).await?;
            Ok(serde_json::json!({
                "presence": presence,
                "canvasPresence": snapshot,
            }))
        },
        ClientMessage::LeaveCanvas => {
            let Some(canvas_id) = gateway.rooms.leave(session_id) else {
                return Ok(serde_json::json!({}));
            };
            gateway
                .collab
                .leave_canvas(canvas_id, user_id.clone())
                .await?;
            Ok(serde_json::json!({}))
        },
        ClientMessage::FocusConversation { conversation_id } => {
            let canvas_id = joined_canvas(gateway, session_id)?;
            let focus = gateway
                .collab
                .focus_conversation(canvas_id, conversation_id, user_id.clone(), user.clone())
                .await?;
            Ok(serde_json::to_value(focus).unwrap_or_default())
        },
        ClientMessage::LockNode {
            conversation_id,
            node_id,
            lock_duration,
        } => {
            let canvas_id = joined_canvas(gateway, session_id)?;
            let lock = gateway
                .collab
                .lock_node(
                    canvas_id,
                    conversation_id,
                    node_id,
                    user_id.clone(),
                    user.clone(),
                    session_id.clone(),
                    lock_duration.map(Duration::from_secs),
                )
                .await?;
            Ok(serde_json::to_value(lock).unwrap_or_default())
        },
        ClientMessage::UnlockNode {
            conversation_id,
            node_id,
        } => {
            let canvas_id = joined_canvas(gateway, session_id)?;
            let released = gateway
                .collab
                .unlock_node(canvas_id, conversation_id, node_id, user_id.clone())
                .await?;
            Ok(serde_json::json!({ "released": released }))
        },
        ClientMessage::UpdateCursor { x, y } => {
            let canvas_id = joined_canvas(gateway, session_id)?;
            let cursor = gateway
                .collab
                .update_cursor_position(canvas_id, user_id.clone(), user.clone(), x, y)
                .await?;
            Ok(serde_json::to_value(cursor).unwrap_or_default())
        },
        ClientMessage::StartTyping { node_id } => {
            let canvas_id = joined_canvas(gateway, session_id)?;
            let indicator = gateway
                .collab
                .update_typing_indicator(canvas_id, node_id, user_id.clone(), user.clone(), true)
                .await?;
            Ok(serde_json::to_value(indicator).unwrap_or_default())
        },
        ClientMessage::StopTyping { node_id } => {
            let canvas_id = joined_canvas(gateway, session_id)?;
            gateway
                .collab
                .update_typing_indicator(canvas_id, node_id, user_id.clone(), user.clone(), false)
                .await?;
            Ok(serde_json::json!({}))
        },
        ClientMessage::Heartbeat => {
            let canvas_id = joined_canvas(gateway, session_id)?;
            gateway
                .collab
                .heartbeat(canvas_id, user_id.clone())
                .await?;
            Ok(serde_json::json!({}))
        },
        ClientMessage::GetCanvasPresence => {
            let canvas_id = joined_canvas(gateway, session_id)?;
            let snapshot = gateway.collab.get_canvas_presence(canvas_id).await?;
            Ok(serde_json::to_value(snapshot).unwrap_or_default())
        },
    }
}
