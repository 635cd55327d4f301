use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::{serde_as, base64::Base64};
use crate::models::PresenceState;

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AuthMessage {
    pub token: String,
    pub user_id: Option<String>,
    pub username: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct JoinSessionMessage {
    pub session_id: String,
    pub username: Option<String>,
    pub document_type: Option<String>,
    pub document_id: Option<String>,
}

#[serde_as]
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UpdateMessage {
    #[serde_as(as = "Base64")]
    pub update: Vec<u8>,
}

#[derive(Deserialize, Debug)]
pub struct CursorMessage {
    pub position: Value,
    pub selection: Option<Value>,
}

#[derive(Deserialize, Debug)]
pub struct PresenceMessage {
    pub state: PresenceState,
}

#[derive(Deserialize, Debug, Clone)]
pub struct CommentBody {
    pub text: String,
    #[serde(default)]
    pub position: Option<Value>,
    #[serde(default)]
    pub range: Option<Value>,
}

#[derive(Deserialize, Debug)]
pub struct CommentMessage {
    pub comment: CommentBody,
}

/// Messages accepted from a client
#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
    Auth(AuthMessage),
    JoinSession(JoinSessionMessage),
    LeaveSession,
    Update(UpdateMessage),
    Cursor(CursorMessage),
    Presence(PresenceMessage),
    Comment(CommentMessage),
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct WelcomeMessage {
    pub message: String,
    pub client_id: String,
}

#[derive(Serialize, Debug, Clone)]
pub struct PongMessage {}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AuthSuccessMessage {
    pub user_id: String,
    pub username: String,
}

#[derive(Serialize, Debug, Clone)]
pub struct ErrorMessage {
    pub message: String,
}

#[serde_as]
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct InitialStateMessage {
    pub client_id: String,
    #[serde_as(as = "Base64")]
    pub state: Vec<u8>,
    pub username: String,
    pub color: String,
}

/// A participant as seen by a joining client
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    /// Live connection of this user in the session, absent when only persisted
    pub client_id: Option<String>,
    pub user_id: String,
    pub username: String,
    pub color: String,
    pub cursor_position: Option<Value>,
    pub selection: Option<Value>,
    pub presence: PresenceState,
}

#[derive(Serialize, Debug, Clone)]
pub struct ClientListMessage {
    pub clients: Vec<ClientInfo>,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ClientJoinMessage {
    pub client_id: String,
    pub user_id: String,
    pub username: String,
    pub color: String,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ClientLeaveMessage {
    pub client_id: String,
    pub user_id: String,
}

#[serde_as]
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DocumentUpdateMessage {
    #[serde_as(as = "Base64")]
    pub update: Vec<u8>,
    pub client_id: String,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CursorData {
    pub client_id: String,
    pub user_id: String,
    pub position: Value,
    pub selection: Option<Value>,
}

#[derive(Serialize, Debug, Clone)]
pub struct CursorBroadcastMessage {
    pub data: CursorData,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PresenceBroadcastMessage {
    pub client_id: String,
    pub user_id: String,
    pub state: PresenceState,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CommentBroadcastMessage {
    pub client_id: String,
    pub user_id: String,
    pub username: String,
    pub text: String,
    pub position: Option<Value>,
    pub range: Option<Value>,
    pub timestamp: String,
}

/// Messages sent to a client
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "welcome")]
    Welcome(WelcomeMessage),
    #[serde(rename = "pong")]
    Pong(PongMessage),
    #[serde(rename = "auth_success")]
    AuthSuccess(AuthSuccessMessage),
    #[serde(rename = "auth_error")]
    AuthError(ErrorMessage),
    #[serde(rename = "initialState")]
    InitialState(InitialStateMessage),
    #[serde(rename = "clientList")]
    ClientList(ClientListMessage),
    #[serde(rename = "clientJoin")]
    ClientJoin(ClientJoinMessage),
    #[serde(rename = "clientLeave")]
    ClientLeave(ClientLeaveMessage),
    #[serde(rename = "yjsUpdate")]
    DocumentUpdate(DocumentUpdateMessage),
    #[serde(rename = "cursor")]
    Cursor(CursorBroadcastMessage),
    #[serde(rename = "presence")]
    Presence(PresenceBroadcastMessage),
    #[serde(rename = "comment")]
    Comment(CommentBroadcastMessage),
    #[serde(rename = "error")]
    Error(ErrorMessage),
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error(ErrorMessage { message: message.into() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_messages_use_snake_case_tags() {
        let msg: ClientMessage = serde_json::from_value(json!({
            "type": "join_session",
            "sessionId": "S1",
            "username": "Ada"
        }))
        .unwrap();
        match msg {
            ClientMessage::JoinSession(join) => {
                assert_eq!(join.session_id, "S1");
                assert_eq!(join.username.as_deref(), Some("Ada"));
                assert!(join.document_type.is_none());
            }
            other => panic!("unexpected message {:?}", other),
        }

        let msg: ClientMessage = serde_json::from_value(json!({"type": "leave_session"})).unwrap();
        assert!(matches!(msg, ClientMessage::LeaveSession));
    }

    #[test]
    fn update_payload_is_base64() {
        let msg: ClientMessage = serde_json::from_value(json!({"type": "update", "update": "AQID"})).unwrap();
        match msg {
            ClientMessage::Update(update) => assert_eq!(update.update, vec![1, 2, 3]),
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn unknown_type_is_rejected() {
        let res = serde_json::from_value::<ClientMessage>(json!({"type": "explode"}));
        assert!(res.is_err());
    }

    #[test]
    fn server_messages_carry_wire_names() {
        let msg = ServerMessage::DocumentUpdate(DocumentUpdateMessage {
            update: vec![1, 2, 3],
            client_id: "c1".to_string(),
        });
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "yjsUpdate", "update": "AQID", "clientId": "c1"})
        );

        let pong = serde_json::to_value(ServerMessage::Pong(PongMessage {})).unwrap();
        assert_eq!(pong, json!({"type": "pong"}));

        let err = serde_json::to_value(ServerMessage::error("nope")).unwrap();
        assert_eq!(err, json!({"type": "error", "message": "nope"}));
    }
}
