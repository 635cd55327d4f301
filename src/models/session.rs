use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use crate::models::{CollaborationEvent, CollaborationSession, DocumentVersionSummary, SessionParticipant};

#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionDetailResponse {
    pub session: CollaborationSession,
    pub participants: Vec<SessionParticipant>,
    pub live_clients: u32,
    pub document_loaded: bool,
}

#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DocumentVersionListResponse {
    pub session_id: String,
    pub versions: Vec<DocumentVersionSummary>,
}

#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionEventsResponse {
    pub session_id: String,
    pub events: Vec<CollaborationEvent>,
}
