use std::sync::Arc;
use axum::{
    extract::{State, ws::{Message, WebSocket, WebSocketUpgrade}},
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::client::Outbound;
use super::dispatch;
use super::hub::CollabHub;
use crate::models::ServerMessage;
use crate::AppState;

/// WebSocket handler
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    debug!("New WebSocket connection attempt");
    ws.on_upgrade(move |socket| handle_socket(socket, state.hub))
}

/// Drive one socket until either side goes away
pub async fn handle_socket(socket: WebSocket, hub: Arc<CollabHub>) {
    // Split the socket into sender and receiver
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
    let client_id = hub.on_connect(tx).await;

    // Writer: drain the outbound queue into the socket
    let writer_id = client_id.clone();
    let mut send_task = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            let frame = match outbound {
                Outbound::Message(msg) => match serde_json::to_string(&msg) {
                    Ok(text) => Message::Text(text),
                    Err(e) => {
                        error!("Failed to serialize message for client {}: {}", writer_id, e);
                        continue;
                    }
                },
                Outbound::Ping => Message::Ping(Vec::new()),
                Outbound::Close => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            };
            if sender.send(frame).await.is_err() {
                debug!("Socket of client {} stopped accepting frames", writer_id);
                break;
            }
        }
    });

    // Reader: one dispatch per text frame, in arrival order
    let reader_hub = hub.clone();
    let reader_id = client_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(frame) = receiver.next().await {
            match frame {
                Ok(Message::Text(text)) => dispatch::handle_text(&reader_hub, &reader_id, &text).await,
                Ok(Message::Binary(_)) => {
                    reader_hub
                        .send_to(&reader_id, ServerMessage::error("Binary frames are not supported"))
                        .await;
                }
                Ok(Message::Pong(_)) => reader_hub.mark_alive(&reader_id).await,
                // Pings are answered by axum itself
                Ok(Message::Ping(_)) => {}
                Ok(Message::Close(_)) => break,
                Err(e) => {
                    warn!("Socket error for client {}: {}", reader_id, e);
                    break;
                }
            }
        }
    });

    // Wait for either task to finish (and finish the other)
    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    };

    hub.on_disconnect(&client_id).await;
    info!("WebSocket connection terminated for client {}", client_id);
}
