use serde_json::Value;
use tracing::{debug, warn};

use super::hub::{CollabHub, DocumentRef};
use crate::models::{ClientMessage, PongMessage, ServerMessage};

/// Parse one text frame and route it
pub async fn handle_text(hub: &CollabHub, client_id: &str, text: &str) {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            warn!("Unparseable message from client {}: {}", client_id, e);
            hub.send_to(client_id, ServerMessage::error("Invalid message format")).await;
            return;
        }
    };

    let msg_type = value.get("type").and_then(Value::as_str).unwrap_or("<missing>").to_string();
    debug!("Received '{}' message from client {}", msg_type, client_id);

    match serde_json::from_value::<ClientMessage>(value) {
        Ok(message) => dispatch(hub, client_id, message).await,
        Err(e) => {
            warn!("Rejected '{}' message from client {}: {}", msg_type, client_id, e);
            hub.send_to(
                client_id,
                ServerMessage::error(format!("Unknown or malformed message '{}': {}", msg_type, e)),
            )
            .await;
        }
    }
}

/// Single entry point for every client message
pub async fn dispatch(hub: &CollabHub, client_id: &str, message: ClientMessage) {
    let result = match message {
        ClientMessage::Ping => {
            hub.send_to(client_id, ServerMessage::Pong(PongMessage {})).await;
            Ok(())
        }
        ClientMessage::Auth(auth) => {
            hub.authenticate(client_id, &auth.token, auth.user_id.as_deref(), auth.username.as_deref())
                .await;
            Ok(())
        }
        ClientMessage::JoinSession(join) => {
            let doc_ref = DocumentRef {
                document_type: join.document_type,
                document_id: join.document_id,
            };
            hub.join_session(client_id, &join.session_id, join.username.as_deref(), doc_ref)
                .await
        }
        ClientMessage::LeaveSession => hub.leave_session(client_id).await,
        ClientMessage::Update(update) => hub.apply_update(client_id, &update.update).await,
        ClientMessage::Cursor(cursor) => {
            hub.update_cursor(client_id, cursor.position, cursor.selection).await;
            Ok(())
        }
        ClientMessage::Presence(presence) => {
            hub.update_presence(client_id, presence.state).await;
            Ok(())
        }
        ClientMessage::Comment(comment) => hub.add_comment(client_id, comment.comment).await,
    };

    if let Err(e) = result {
        warn!("Request from client {} failed: {}", client_id, e);
        hub.send_to(client_id, ServerMessage::error(e.to_string())).await;
    }
}
