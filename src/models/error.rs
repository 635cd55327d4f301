use axum::{http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Response for an error
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub code: u16,
    pub status: String,
    pub error: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// Build the error tuple returned by every handler
pub fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (status, Json(ErrorResponse {
        code: status.as_u16(),
        status: status.to_string(),
        error: error.into(),
    }))
}
