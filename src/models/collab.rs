use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

/// Lifecycle status of a persisted collaboration session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Archived,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SessionStatus::Active),
            "archived" => Ok(SessionStatus::Archived),
            other => Err(format!("Unknown session status '{}'", other)),
        }
    }
}

/// A named collaboration context bound to exactly one logical document
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CollaborationSession {
    pub session_id: String,
    pub name: String,
    pub document_type: String,
    pub document_id: String,
    pub owner_id: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSession {
    pub session_id: String,
    pub name: String,
    pub document_type: String,
    pub document_id: String,
    pub owner_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    #[default]
    Active,
    Inactive,
    Away,
}

/// Ephemeral activity state of a participant, with free-form extras
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PresenceState {
    #[serde(default)]
    pub status: PresenceStatus,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

/// One row per user per session, reused across reconnects
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionParticipant {
    pub session_id: String,
    pub user_id: String,
    pub display_name: String,
    pub is_active: bool,
    pub color: String,
    pub cursor_position: Option<Value>,
    pub selection: Option<Value>,
    #[schema(value_type = Object)]
    pub presence: PresenceState,
    pub joined_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
}

/// Durable full-state checkpoint of a session's document
#[derive(Debug, Clone)]
pub struct DocumentVersion {
    pub id: Uuid,
    pub session_id: String,
    pub document_type: String,
    pub document_id: String,
    pub version: i32,
    /// Readable JSON view of the document at this version
    pub snapshot: Vec<u8>,
    /// Raw merge-engine state, the recovery source
    pub state: Vec<u8>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub metadata: Value,
}

#[derive(Debug, Clone)]
pub struct NewDocumentVersion {
    pub session_id: String,
    pub document_type: String,
    pub document_id: String,
    pub version: i32,
    pub snapshot: Vec<u8>,
    pub state: Vec<u8>,
    pub created_by: String,
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DocumentVersionSummary {
    pub version: i32,
    pub session_id: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub size: i64,
    pub metadata: Value,
}

impl From<&DocumentVersion> for DocumentVersionSummary {
    fn from(v: &DocumentVersion) -> Self {
        Self {
            version: v.version,
            session_id: v.session_id.clone(),
            created_by: v.created_by.clone(),
            created_at: v.created_at,
            size: v.state.len() as i64,
            metadata: v.metadata.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Join,
    Leave,
    Update,
    Comment,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Join => "join",
            EventType::Leave => "leave",
            EventType::Update => "update",
            EventType::Comment => "comment",
        }
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "join" => Ok(EventType::Join),
            "leave" => Ok(EventType::Leave),
            "update" => Ok(EventType::Update),
            "comment" => Ok(EventType::Comment),
            other => Err(format!("Unknown event type '{}'", other)),
        }
    }
}

/// Append-only audit entry
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CollaborationEvent {
    pub id: Uuid,
    pub session_id: String,
    pub user_id: String,
    pub event_type: EventType,
    pub client_id: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewEvent {
    pub session_id: String,
    pub user_id: String,
    pub event_type: EventType,
    pub client_id: String,
    pub payload: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn presence_keeps_freeform_attributes() {
        let presence: PresenceState =
            serde_json::from_value(json!({"status": "away", "typing": true})).unwrap();
        assert_eq!(presence.status, PresenceStatus::Away);
        assert_eq!(presence.attributes.get("typing"), Some(&json!(true)));

        let back = serde_json::to_value(&presence).unwrap();
        assert_eq!(back, json!({"status": "away", "typing": true}));
    }

    #[test]
    fn presence_status_defaults_to_active() {
        let presence: PresenceState = serde_json::from_value(json!({})).unwrap();
        assert_eq!(presence.status, PresenceStatus::Active);
    }

    #[test]
    fn status_and_event_type_parse_their_own_names() {
        for status in [SessionStatus::Active, SessionStatus::Archived] {
            assert_eq!(status.as_str().parse::<SessionStatus>(), Ok(status));
        }
        for event in [EventType::Join, EventType::Leave, EventType::Update, EventType::Comment] {
            assert_eq!(event.as_str().parse::<EventType>(), Ok(event));
        }
        assert!("deleted".parse::<SessionStatus>().is_err());
    }
}
