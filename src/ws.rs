use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::ProtocolError;
use crate::relay::short;
use crate::signal::parse_frame;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let max_frame_bytes = state.config.max_frame_bytes;
    ws.max_message_size(max_frame_bytes)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

/// Runs one connection until either direction fails, then tells the relay
/// exactly once that it is gone.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let client_id = Uuid::new_v4().to_string();

    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    state.relay.connect(&client_id, tx);

    // Drain the outbox into the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg)).await.is_err() {
                break;
            }
        }
    });

    // Parse inbound frames and hand them to the relay
    let relay = state.relay.clone();
    let client_id_clone = client_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(frame) = receiver.next().await {
            match frame {
                Ok(Message::Text(text)) => match parse_frame(&text) {
                    Ok(event) => relay.inbound(&client_id_clone, event),
                    Err(err) => relay.reject(&client_id_clone, "frame", err),
                },
                Ok(Message::Binary(_)) => {
                    relay.reject(&client_id_clone, "frame", ProtocolError::UnsupportedFrame)
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                // Includes frames over `max_frame_bytes`; the socket is
                // unusable after that, so the connection is closed.
                Err(e) => {
                    warn!("Closing {} after read error: {}", short(&client_id_clone), e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.relay.disconnect(&client_id);
}
