use utoipa::OpenApi;
use crate::models::*;

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn health_check_doc() {}

/// Readiness check endpoint
#[utoipa::path(
    get,
    path = "/api/ready",
    responses(
        (status = 200, description = "Service and store are ready", body = HealthResponse),
        (status = 503, description = "Store is unreachable", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn ready_check_doc() {}

/// Engine and host statistics
#[utoipa::path(
    get,
    path = "/api/v1/diagnostics",
    responses(
        (status = 200, description = "Diagnostics", body = DiagnosticsResponse),
        (status = 401, description = "Missing or invalid token")
    )
)]
#[allow(dead_code)]
pub async fn diagnostics_doc() {}

/// Persisted session with its active participants
#[utoipa::path(
    get,
    path = "/api/v1/sessions/{session_id}",
    params(("session_id" = String, Path, description = "Session id")),
    responses(
        (status = 200, description = "Session found", body = SessionDetailResponse),
        (status = 404, description = "Session not found", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn session_detail_doc() {}

/// Current document of a session
#[utoipa::path(
    get,
    path = "/api/v1/sessions/{session_id}/document",
    params(
        ("session_id" = String, Path, description = "Session id"),
        ("format" = Option<String>, Query, description = "json (default), binary or both")
    ),
    responses(
        (status = 200, description = "Live or latest stored document", body = DocumentExportResponse),
        (status = 400, description = "Invalid format", body = ErrorResponse),
        (status = 404, description = "Session or document not found", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn session_document_doc() {}

/// Stored versions of a session's document, newest first
#[utoipa::path(
    get,
    path = "/api/v1/sessions/{session_id}/versions",
    params(("session_id" = String, Path, description = "Session id")),
    responses(
        (status = 200, description = "Version list", body = DocumentVersionListResponse),
        (status = 404, description = "Session not found", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn session_versions_doc() {}

/// One stored version of a session's document
#[utoipa::path(
    get,
    path = "/api/v1/sessions/{session_id}/versions/{version}",
    params(
        ("session_id" = String, Path, description = "Session id"),
        ("version" = i32, Path, description = "Version number"),
        ("format" = Option<String>, Query, description = "json (default), binary or both")
    ),
    responses(
        (status = 200, description = "Stored document", body = DocumentExportResponse),
        (status = 404, description = "Session or version not found", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn session_version_doc() {}

/// Activity feed of a session, newest first
#[utoipa::path(
    get,
    path = "/api/v1/sessions/{session_id}/events",
    params(
        ("session_id" = String, Path, description = "Session id"),
        ("limit" = Option<i64>, Query, description = "1 to 500, default 50")
    ),
    responses(
        (status = 200, description = "Events", body = SessionEventsResponse),
        (status = 400, description = "Invalid limit", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn session_events_doc() {}

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check_doc,
        ready_check_doc,
        diagnostics_doc,
        session_detail_doc,
        session_document_doc,
        session_versions_doc,
        session_version_doc,
        session_events_doc,
    ),
    components(
        schemas(
            HealthResponse,
            DiagnosticsResponse,
            ErrorResponse,
            DocumentExportResponse,
            SessionDetailResponse,
            DocumentVersionListResponse,
            SessionEventsResponse,
            CollaborationSession,
            SessionStatus,
            SessionParticipant,
            DocumentVersionSummary,
            CollaborationEvent,
            EventType,
        )
    ),
    tags(
        (name = "api", description = "Collaboration API endpoints")
    )
)]
pub struct ApiDoc;
