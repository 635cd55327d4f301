use crate::{
    crdt::restore,
    handlers::session::load_session,
    models::{api_error, ApiError, DocumentExportResponse, DocumentVersion},
    AppState,
};
use axum::{extract::{State, Path, Query}, http::StatusCode, Json};
use base64::{engine::general_purpose, Engine as _};
use serde::Deserialize;
use tracing::error;

#[derive(Deserialize)]
pub struct OutputFormatQuery {
    format: Option<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum OutputFormat {
    Json,
    Binary,
    Both,
}

impl OutputFormat {
    fn from_query(format: Option<String>) -> Result<Self, ApiError> {
        match format.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            None => Ok(OutputFormat::Json),
            Some(value) => match value.to_lowercase().as_str() {
                "json" => Ok(OutputFormat::Json),
                "binary" => Ok(OutputFormat::Binary),
                "both" => Ok(OutputFormat::Both),
                other => Err(api_error(
                    StatusCode::BAD_REQUEST,
                    format!("Invalid output format '{}'. Use 'json', 'binary', or 'both'.", other),
                )),
            },
        }
    }

    fn include_json(self) -> bool {
        matches!(self, OutputFormat::Json | OutputFormat::Both)
    }

    fn include_binary(self) -> bool {
        matches!(self, OutputFormat::Binary | OutputFormat::Both)
    }
}

/// Current document of a session: the live one when loaded, else the newest version
pub async fn session_document(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<OutputFormatQuery>,
) -> Result<(StatusCode, Json<DocumentExportResponse>), ApiError> {

    let output_format = OutputFormat::from_query(query.format)?;
    let session = load_session(&state, &session_id).await?;

    let live = state.hub.live_document(&session_id).await.map_err(|e| {
        error!("Failed to read live document of session '{}': {}", session_id, e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to read document of session '{}'", session_id))
    })?;
    if let Some(doc) = live {
        return Ok((
            StatusCode::OK,
            Json(DocumentExportResponse {
                session_id,
                source: "live".to_string(),
                version: None,
                json: output_format.include_json().then_some(doc.json),
                binary: output_format.include_binary().then(|| general_purpose::STANDARD.encode(&doc.state)),
            }),
        ));
    }

    let version = state
        .store
        .get_latest_document_version(&session.document_type, &session.document_id)
        .await
        .map_err(|e| {
            error!("Error loading document of session '{}' from store: {}", session_id, e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("Error loading document of session '{}'", session_id))
        })?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("No document stored for session '{}'", session_id)))?;

    stored_payload(&state, version, output_format).map(|payload| (StatusCode::OK, Json(payload)))
}

/// One stored version of a session's document
pub async fn session_version(
    State(state): State<AppState>,
    Path((session_id, version)): Path<(String, i32)>,
    Query(query): Query<OutputFormatQuery>,
) -> Result<(StatusCode, Json<DocumentExportResponse>), ApiError> {

    let output_format = OutputFormat::from_query(query.format)?;
    let session = load_session(&state, &session_id).await?;

    let stored = state
        .store
        .get_document_version(&session.document_type, &session.document_id, version)
        .await
        .map_err(|e| {
            error!("Error loading version {} of session '{}': {}", version, session_id, e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("Error loading version {} of session '{}'", version, session_id))
        })?
        .ok_or_else(|| {
            api_error(StatusCode::NOT_FOUND, format!("Version {} of session '{}' not found", version, session_id))
        })?;

    stored_payload(&state, stored, output_format).map(|payload| (StatusCode::OK, Json(payload)))
}

fn stored_payload(
    state: &AppState,
    version: DocumentVersion,
    output_format: OutputFormat,
) -> Result<DocumentExportResponse, ApiError> {
    let json = if output_format.include_json() {
        let doc = restore(&**state.hub.engine(), &version.state).map_err(|e| {
            error!(
                "Failed to import version {} of {}/{}: {}",
                version.version, version.document_type, version.document_id, e
            );
            api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("Stored version {} is unreadable", version.version))
        })?;
        Some(doc.to_json())
    } else {
        None
    };

    Ok(DocumentExportResponse {
        session_id: version.session_id,
        source: "stored".to_string(),
        version: Some(version.version),
        json,
        binary: output_format.include_binary().then(|| general_purpose::STANDARD.encode(&version.state)),
    })
}
