use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::store::{CollabStore, StoreError};
use crate::models::{
    CollaborationEvent, CollaborationSession, DocumentVersion, DocumentVersionSummary, NewDocumentVersion,
    NewEvent, NewSession, PresenceState, SessionParticipant, SessionStatus,
};

#[derive(Default)]
struct Tables {
    sessions: HashMap<String, CollaborationSession>,
    participants: HashMap<(String, String), SessionParticipant>,
    versions: Vec<DocumentVersion>,
    events: Vec<CollaborationEvent>,
}

/// In-process store, used when no database is configured
#[derive(Default)]
pub struct MemoryCollabStore {
    tables: Mutex<Tables>,
}

impl MemoryCollabStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
impl MemoryCollabStore {
    pub async fn backdate_session(&self, session_id: &str, days: i64) {
        let mut tables = self.tables.lock().await;
        if let Some(session) = tables.sessions.get_mut(session_id) {
            session.last_activity = session.last_activity - Duration::days(days);
        }
    }

    pub async fn backdate_events(&self, session_id: &str, days: i64) {
        let mut tables = self.tables.lock().await;
        for event in tables.events.iter_mut().filter(|e| e.session_id == session_id) {
            event.created_at = event.created_at - Duration::days(days);
        }
    }

    pub async fn participant_rows(&self, session_id: &str, user_id: &str) -> Vec<SessionParticipant> {
        let tables = self.tables.lock().await;
        tables
            .participants
            .values()
            .filter(|p| p.session_id == session_id && p.user_id == user_id)
            .cloned()
            .collect()
    }

    pub async fn version_count(&self) -> usize {
        self.tables.lock().await.versions.len()
    }
}

fn participant_mut<'a>(
    tables: &'a mut Tables,
    session_id: &str,
    user_id: &str,
) -> Result<&'a mut SessionParticipant, StoreError> {
    tables
        .participants
        .get_mut(&(session_id.to_string(), user_id.to_string()))
        .ok_or_else(|| StoreError::NotFound(format!("participant {} in session {}", user_id, session_id)))
}

#[async_trait]
impl CollabStore for MemoryCollabStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<CollaborationSession>, StoreError> {
        Ok(self.tables.lock().await.sessions.get(session_id).cloned())
    }

    async fn create_session(&self, new_session: NewSession) -> Result<CollaborationSession, StoreError> {
        let mut tables = self.tables.lock().await;
        if tables.sessions.contains_key(&new_session.session_id) {
            return Err(StoreError::Conflict(format!("session {} already exists", new_session.session_id)));
        }
        let now = Utc::now();
        let session = CollaborationSession {
            session_id: new_session.session_id.clone(),
            name: new_session.name,
            document_type: new_session.document_type,
            document_id: new_session.document_id,
            owner_id: new_session.owner_id,
            status: SessionStatus::Active,
            created_at: now,
            last_activity: now,
        };
        tables.sessions.insert(new_session.session_id, session.clone());
        Ok(session)
    }

    async fn update_last_activity(&self, session_id: &str) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        match tables.sessions.get_mut(session_id) {
            Some(session) => {
                session.last_activity = Utc::now();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("session {}", session_id))),
        }
    }

    async fn add_participant(
        &self,
        session_id: &str,
        user_id: &str,
        display_name: &str,
        color: &str,
    ) -> Result<SessionParticipant, StoreError> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();
        let participant = tables
            .participants
            .entry((session_id.to_string(), user_id.to_string()))
            .and_modify(|p| {
                p.is_active = true;
                p.display_name = display_name.to_string();
                p.color = color.to_string();
                p.last_active = now;
                p.left_at = None;
            })
            .or_insert_with(|| SessionParticipant {
                session_id: session_id.to_string(),
                user_id: user_id.to_string(),
                display_name: display_name.to_string(),
                is_active: true,
                color: color.to_string(),
                cursor_position: None,
                selection: None,
                presence: PresenceState::default(),
                joined_at: now,
                last_active: now,
                left_at: None,
            });
        Ok(participant.clone())
    }

    async fn get_participants(&self, session_id: &str) -> Result<Vec<SessionParticipant>, StoreError> {
        let tables = self.tables.lock().await;
        let mut participants: Vec<SessionParticipant> = tables
            .participants
            .values()
            .filter(|p| p.session_id == session_id && p.is_active)
            .cloned()
            .collect();
        participants.sort_by_key(|p| p.joined_at);
        Ok(participants)
    }

    async fn remove_participant(&self, session_id: &str, user_id: &str) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let participant = participant_mut(&mut tables, session_id, user_id)?;
        participant.is_active = false;
        participant.left_at = Some(Utc::now());
        Ok(())
    }

    async fn update_cursor_position(
        &self,
        session_id: &str,
        user_id: &str,
        position: &Value,
        selection: Option<&Value>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let participant = participant_mut(&mut tables, session_id, user_id)?;
        participant.cursor_position = Some(position.clone());
        participant.selection = selection.cloned();
        participant.last_active = Utc::now();
        Ok(())
    }

    async fn update_presence(&self, session_id: &str, user_id: &str, presence: &PresenceState) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let participant = participant_mut(&mut tables, session_id, user_id)?;
        participant.presence = presence.clone();
        participant.last_active = Utc::now();
        Ok(())
    }

    async fn get_latest_document_version(
        &self,
        document_type: &str,
        document_id: &str,
    ) -> Result<Option<DocumentVersion>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .versions
            .iter()
            .filter(|v| v.document_type == document_type && v.document_id == document_id)
            .max_by_key(|v| v.version)
            .cloned())
    }

    async fn get_document_version(
        &self,
        document_type: &str,
        document_id: &str,
        version: i32,
    ) -> Result<Option<DocumentVersion>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .versions
            .iter()
            .find(|v| v.document_type == document_type && v.document_id == document_id && v.version == version)
            .cloned())
    }

    async fn list_document_versions(
        &self,
        document_type: &str,
        document_id: &str,
    ) -> Result<Vec<DocumentVersionSummary>, StoreError> {
        let tables = self.tables.lock().await;
        let mut versions: Vec<DocumentVersionSummary> = tables
            .versions
            .iter()
            .filter(|v| v.document_type == document_type && v.document_id == document_id)
            .map(DocumentVersionSummary::from)
            .collect();
        versions.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(versions)
    }

    async fn save_document_version(&self, version: NewDocumentVersion) -> Result<DocumentVersion, StoreError> {
        let mut tables = self.tables.lock().await;
        let taken = tables.versions.iter().any(|v| {
            v.document_type == version.document_type
                && v.document_id == version.document_id
                && v.version == version.version
        });
        if taken {
            return Err(StoreError::Conflict(format!(
                "version {} of {}/{} already exists",
                version.version, version.document_type, version.document_id
            )));
        }
        let saved = DocumentVersion {
            id: Uuid::new_v4(),
            session_id: version.session_id,
            document_type: version.document_type,
            document_id: version.document_id,
            version: version.version,
            snapshot: version.snapshot,
            state: version.state,
            created_by: version.created_by,
            created_at: Utc::now(),
            metadata: version.metadata,
        };
        tables.versions.push(saved.clone());
        Ok(saved)
    }

    async fn record_event(&self, event: NewEvent) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        tables.events.push(CollaborationEvent {
            id: Uuid::new_v4(),
            session_id: event.session_id,
            user_id: event.user_id,
            event_type: event.event_type,
            client_id: event.client_id,
            payload: event.payload,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn list_events(&self, session_id: &str, limit: i64) -> Result<Vec<CollaborationEvent>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .events
            .iter()
            .rev()
            .filter(|e| e.session_id == session_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn cleanup_inactive_sessions(&self, age_days: i64) -> Result<u64, StoreError> {
        let cutoff = Utc::now() - Duration::days(age_days);
        let mut tables = self.tables.lock().await;
        let mut archived = 0;
        for session in tables.sessions.values_mut() {
            if session.status == SessionStatus::Active && session.last_activity < cutoff {
                session.status = SessionStatus::Archived;
                archived += 1;
            }
        }
        Ok(archived)
    }

    async fn purge_old_events(&self, age_days: i64) -> Result<u64, StoreError> {
        let cutoff = Utc::now() - Duration::days(age_days);
        let mut tables = self.tables.lock().await;
        let before = tables.events.len();
        tables.events.retain(|e| e.created_at >= cutoff);
        Ok((before - tables.events.len()) as u64)
    }
}
