//! WebSocket upgrade handler

use std::borrow::Cow;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{MatchHandle, PlayerInput};
use crate::util::rate_limit::PlayerRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{decode_client_msg, ServerMsg};

/// Per-connection outbound queue depth
const OUTBOUND_BUFFER: usize = 256;

/// Query parameters for WebSocket connection
#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    /// Room to join, the configured default when absent
    pub room: Option<String>,
    /// Display name shown to the opponent
    pub name: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let user_id = Uuid::new_v4();
    let room = query
        .room
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| state.config.default_room.clone());
    let display_name = query
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| format!("Player_{}", &user_id.to_string()[..8]));

    info!(user_id = %user_id, room = %room, "WebSocket upgrade");
    ws.on_upgrade(move |socket| handle_socket(socket, user_id, room, display_name, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, user_id: Uuid, room: String, display_name: String, state: AppState) {
    let (mut ws_sink, ws_stream) = socket.split();

    let welcome = ServerMsg::Welcome {
        user_id,
        server_time: unix_millis(),
    };
    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        error!(user_id = %user_id, error = %e, "Failed to send welcome");
        return;
    }

    let (outbound_tx, outbound_rx) = mpsc::channel::<ServerMsg>(OUTBOUND_BUFFER);
    let handle = match state.rooms.join(&room, user_id, display_name, outbound_tx).await {
        Ok(handle) => handle,
        Err(e) => {
            warn!(user_id = %user_id, room = %room, error = %e, "Join failed");
            let msg = ServerMsg::Error {
                code: "join_failed".to_string(),
                message: e.to_string(),
            };
            let _ = send_msg(&mut ws_sink, &msg).await;
            let _ = ws_sink.close().await;
            return;
        }
    };

    let limiter = PlayerRateLimiter::new(state.config.input_rate_limit);
    run_session(user_id, handle, ws_sink, ws_stream, outbound_rx, limiter).await;

    info!(user_id = %user_id, "WebSocket connection closed");
}

/// Run the WebSocket session with read/write split
async fn run_session(
    user_id: Uuid,
    handle: MatchHandle,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut ws_stream: SplitStream<WebSocket>,
    mut outbound_rx: mpsc::Receiver<ServerMsg>,
    rate_limiter: PlayerRateLimiter,
) {
    // Writer: match -> WebSocket. The match dropping our sender means it is
    // over, so the socket gets a normal closure.
    let writer_handle = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(user_id = %user_id, error = %e, "WebSocket send failed");
                return;
            }
        }
        let frame = CloseFrame {
            code: close_code::NORMAL,
            reason: Cow::from("match over"),
        };
        if let Err(e) = ws_sink.send(Message::Close(Some(frame))).await {
            debug!(user_id = %user_id, error = %e, "Close frame not sent");
        }
    });

    // Reader loop: WebSocket -> match loop
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_input() {
                    warn!(user_id = %user_id, "Rate limited input message");
                    continue;
                }

                // Malformed input is dropped without an answer
                match decode_client_msg(&text) {
                    Ok(msg) => {
                        let input = PlayerInput {
                            user_id,
                            msg,
                            received_at: unix_millis(),
                        };
                        if !handle.send_input(input).await {
                            debug!(user_id = %user_id, "Match input channel closed");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(user_id = %user_id, error = %e, "Failed to parse client message");
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(user_id = %user_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(frame)) => {
                info!(user_id = %user_id, code = ?frame.map(|f| f.code), "Client initiated close");
                break;
            }
            Err(e) => {
                error!(user_id = %user_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    handle.disconnect(user_id).await;

    // Client is gone, nothing left to write
    writer_handle.abort();
}

/// Send a message over WebSocket
async fn send_msg(sink: &mut SplitSink<WebSocket, Message>, msg: &ServerMsg) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json)).await.map_err(|e| e.to_string())
}
