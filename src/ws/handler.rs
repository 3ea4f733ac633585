//! WebSocket upgrade handler and per-connection session

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::room::{JoinError, RoomCommand, RoomHandle};
use crate::util::rate_limit::ClientRateLimiter;
use crate::ws::protocol::{ClientMsg, LoginAck, ServerMsg};

/// Display names are capped at this many characters before join
pub const NAME_MAX_CHARS: usize = 12;

/// WebSocket upgrade handler for `GET /:room/:name`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path((room_id, name)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Response {
    let name: String = name.chars().take(NAME_MAX_CHARS).collect();
    info!(room_id = %room_id, name = %name, "WebSocket upgrade");
    ws.on_upgrade(move |socket| handle_socket(socket, room_id, name, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, room_id: String, name: String, state: AppState) {
    let client_id = Uuid::new_v4();
    let (mut ws_sink, ws_stream) = socket.split();

    let (room, events_rx) = match join_room(&state, &room_id, client_id, &name).await {
        Ok(pair) => pair,
        Err(e) => {
            warn!(room_id = %room_id, name = %name, error = %e, "Join rejected");
            let ack = LoginAck {
                error: Some(e.to_string()),
                id: None,
            };
            let _ = send_json(&mut ws_sink, &ack).await;
            let _ = ws_sink.close().await;
            return;
        }
    };

    let ack = LoginAck {
        error: None,
        id: Some(client_id),
    };
    if send_json(&mut ws_sink, &ack).await.is_err() {
        error!(client_id = %client_id, "Failed to send login ack");
        let _ = room
            .cmd_tx
            .send(RoomCommand::Disconnect { client_id })
            .await;
        return;
    }

    run_session(client_id, &room, ws_sink, ws_stream, events_rx).await;

    // Disconnection is terminal for this client, never retried
    let _ = room
        .cmd_tx
        .send(RoomCommand::Disconnect { client_id })
        .await;

    info!(room_id = %room_id, client_id = %client_id, "WebSocket connection closed");
}

/// Errors surfaced to the connecting client in the login ack
#[derive(Debug, thiserror::Error)]
enum SocketJoinError {
    #[error(transparent)]
    Rejected(#[from] JoinError),

    #[error("room is unavailable")]
    RoomClosed,
}

/// Join the target room, subscribing to its broadcasts first so this
/// session sees its own Join/Spawn events. Retries once if the room task
/// raced to destruction between lookup and join.
async fn join_room(
    state: &AppState,
    room_id: &str,
    client_id: Uuid,
    name: &str,
) -> Result<(RoomHandle, broadcast::Receiver<ServerMsg>), SocketJoinError> {
    for _ in 0..2 {
        let handle = state.rooms.get_or_create(room_id);
        let events_rx = handle.events_tx.subscribe();

        let (reply_tx, reply_rx) = oneshot::channel();
        let join = RoomCommand::Join {
            client_id,
            name: name.to_string(),
            reply: reply_tx,
        };
        if handle.cmd_tx.send(join).await.is_err() {
            continue;
        }

        match reply_rx.await {
            Ok(Ok(())) => return Ok((handle, events_rx)),
            Ok(Err(e)) => return Err(e.into()),
            // Room destroyed mid-join; look it up again
            Err(_) => continue,
        }
    }

    Err(SocketJoinError::RoomClosed)
}

/// Run the WebSocket session with read/write split
async fn run_session(
    client_id: Uuid,
    room: &RoomHandle,
    mut ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    mut events_rx: broadcast::Receiver<ServerMsg>,
) {
    let rate_limiter = ClientRateLimiter::new();

    // Writer task: room broadcasts -> WebSocket
    let writer_handle = tokio::spawn(async move {
        loop {
            match events_rx.recv().await {
                Ok(msg) => {
                    if let Err(e) = send_json(&mut ws_sink, &msg).await {
                        debug!(client_id = %client_id, error = %e, "WebSocket send failed");
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    // Snapshots are full state, so dropped ones are harmless
                    warn!(client_id = %client_id, lagged = n, "Client lagged, skipping messages");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!(client_id = %client_id, "Room broadcast closed");
                    break;
                }
            }
        }
    });

    // Reader loop: WebSocket -> room
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_input() {
                    warn!(client_id = %client_id, "Rate limited input message");
                    continue;
                }

                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(msg) => {
                        let cmd = RoomCommand::Client { client_id, msg };
                        if room.cmd_tx.send(cmd).await.is_err() {
                            debug!(client_id = %client_id, "Room command channel closed");
                            break;
                        }
                    }
                    // Malformed or unknown message: drop it, keep the socket
                    Err(e) => {
                        debug!(client_id = %client_id, error = %e, "Ignoring unparseable message");
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(client_id = %client_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_) | Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(client_id = %client_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(client_id = %client_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    writer_handle.abort();
}

/// Send a JSON message over the WebSocket
async fn send_json<T: Serialize>(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &T,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
