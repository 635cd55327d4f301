use axum::{extract::State, http::StatusCode, Json};
use crate::models::HealthResponse;
use crate::AppState;
use tracing::{debug, error};

/// Health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    debug!("Health check requested");
    Json(HealthResponse {
        status: "ok".to_string(),
        message: "Server is running".to_string(),
        store: None,
    })
}

/// Readiness check endpoint, fails while the store is unreachable
pub async fn ready_check(
    State(state): State<AppState>,
) -> Result<Json<HealthResponse>, (StatusCode, Json<HealthResponse>)> {
    debug!("Readiness check requested");
    let backend = state.store.backend().to_string();
    match state.store.ping().await {
        Ok(()) => Ok(Json(HealthResponse {
            status: "ok".to_string(),
            message: "Service is ready".to_string(),
            store: Some(backend),
        })),
        Err(e) => {
            error!("Readiness check failed: {}", e);
            Err((
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unavailable".to_string(),
                    message: format!("Store is not reachable: {}", e),
                    store: Some(backend),
                }),
            ))
        }
    }
}
