use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Current or historical content of a session's document
#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DocumentExportResponse {
    pub session_id: String,
    /// `live` when served from the loaded document, `stored` otherwise
    pub source: String,
    pub version: Option<i32>,
    pub json: Option<serde_json::value::Value>,
    /// Base64 encoded merge-engine state
    pub binary: Option<String>,
}
