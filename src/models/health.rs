use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// API response for health and readiness checks
#[derive(Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
    /// Persistence backend in use, reported by the readiness check
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<String>,
}
