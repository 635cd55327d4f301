use crate::{
    models::{
        api_error, ApiError, CollaborationSession, DocumentVersionListResponse, SessionDetailResponse,
        SessionEventsResponse,
    },
    AppState,
};
use axum::{extract::{State, Path, Query}, http::StatusCode, Json};
use serde::Deserialize;
use tracing::error;

const DEFAULT_EVENT_LIMIT: i64 = 50;
const MAX_EVENT_LIMIT: i64 = 500;

/// Persisted session or a 404
pub(crate) async fn load_session(state: &AppState, session_id: &str) -> Result<CollaborationSession, ApiError> {
    match state.store.get_session(session_id).await {
        Ok(Some(session)) => Ok(session),
        Ok(None) => Err(api_error(StatusCode::NOT_FOUND, format!("Session '{}' not found", session_id))),
        Err(e) => {
            error!("Error loading session '{}': {}", session_id, e);
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("Error loading session '{}'", session_id)))
        }
    }
}

pub async fn session_detail(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<(StatusCode, Json<SessionDetailResponse>), ApiError> {
    let session = load_session(&state, &session_id).await?;
    let participants = state.store.get_participants(&session_id).await.map_err(|e| {
        error!("Error loading participants of session '{}': {}", session_id, e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("Error loading participants of session '{}'", session_id))
    })?;
    let live_clients = state.hub.live_members(&session_id).await as u32;
    let document_loaded = matches!(state.hub.live_document(&session_id).await, Ok(Some(_)));

    Ok((
        StatusCode::OK,
        Json(SessionDetailResponse {
            session,
            participants,
            live_clients,
            document_loaded,
        }),
    ))
}

pub async fn session_versions(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<(StatusCode, Json<DocumentVersionListResponse>), ApiError> {
    let session = load_session(&state, &session_id).await?;
    let versions = state
        .store
        .list_document_versions(&session.document_type, &session.document_id)
        .await
        .map_err(|e| {
            error!("Error listing versions of session '{}': {}", session_id, e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("Error listing versions of session '{}'", session_id))
        })?;

    Ok((StatusCode::OK, Json(DocumentVersionListResponse { session_id, versions })))
}

#[derive(Deserialize)]
pub struct EventsQuery {
    limit: Option<i64>,
}

/// Activity feed, newest first
pub async fn session_events(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> Result<(StatusCode, Json<SessionEventsResponse>), ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_EVENT_LIMIT);
    if !(1..=MAX_EVENT_LIMIT).contains(&limit) {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("limit must be between 1 and {}", MAX_EVENT_LIMIT),
        ));
    }
    load_session(&state, &session_id).await?;
    let events = state.store.list_events(&session_id, limit).await.map_err(|e| {
        error!("Error loading events of session '{}': {}", session_id, e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("Error loading events of session '{}'", session_id))
    })?;

    Ok((StatusCode::OK, Json(SessionEventsResponse { session_id, events })))
}
