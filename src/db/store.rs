use async_trait::async_trait;
use serde_json::Value;

use crate::models::{
    CollaborationEvent, CollaborationSession, DocumentVersion, DocumentVersionSummary, NewDocumentVersion,
    NewEvent, NewSession, PresenceState, SessionParticipant,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

/// Repositories behind the collaboration engine.
///
/// Participant writes are keyed by (session, user): `add_participant`
/// reactivates an existing row instead of inserting a second one, and
/// `remove_participant` only marks the row inactive.
#[async_trait]
pub trait CollabStore: Send + Sync {
    /// Short backend name reported by readiness checks
    fn backend(&self) -> &'static str;

    async fn ping(&self) -> Result<(), StoreError>;

    async fn get_session(&self, session_id: &str) -> Result<Option<CollaborationSession>, StoreError>;

    async fn create_session(&self, new_session: NewSession) -> Result<CollaborationSession, StoreError>;

    async fn update_last_activity(&self, session_id: &str) -> Result<(), StoreError>;

    async fn add_participant(
        &self,
        session_id: &str,
        user_id: &str,
        display_name: &str,
        color: &str,
    ) -> Result<SessionParticipant, StoreError>;

    /// Active participants, oldest join first
    async fn get_participants(&self, session_id: &str) -> Result<Vec<SessionParticipant>, StoreError>;

    async fn remove_participant(&self, session_id: &str, user_id: &str) -> Result<(), StoreError>;

    async fn update_cursor_position(
        &self,
        session_id: &str,
        user_id: &str,
        position: &Value,
        selection: Option<&Value>,
    ) -> Result<(), StoreError>;

    async fn update_presence(&self, session_id: &str, user_id: &str, presence: &PresenceState) -> Result<(), StoreError>;

    async fn get_latest_document_version(
        &self,
        document_type: &str,
        document_id: &str,
    ) -> Result<Option<DocumentVersion>, StoreError>;

    async fn get_document_version(
        &self,
        document_type: &str,
        document_id: &str,
        version: i32,
    ) -> Result<Option<DocumentVersion>, StoreError>;

    /// Newest version first
    async fn list_document_versions(
        &self,
        document_type: &str,
        document_id: &str,
    ) -> Result<Vec<DocumentVersionSummary>, StoreError>;

    /// Fails with `Conflict` when the version number is already taken
    async fn save_document_version(&self, version: NewDocumentVersion) -> Result<DocumentVersion, StoreError>;

    async fn record_event(&self, event: NewEvent) -> Result<(), StoreError>;

    /// Newest event first
    async fn list_events(&self, session_id: &str, limit: i64) -> Result<Vec<CollaborationEvent>, StoreError>;

    /// Archive active sessions idle for more than `age_days`, returning how many flipped
    async fn cleanup_inactive_sessions(&self, age_days: i64) -> Result<u64, StoreError>;

    /// Delete events older than `age_days`, returning how many were removed
    async fn purge_old_events(&self, age_days: i64) -> Result<u64, StoreError>;
}
