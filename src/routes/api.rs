use crate::handlers::{
    diagnostics, health_check, ready_check, session_detail, session_document, session_events, session_version,
    session_versions,
};
use crate::routes::auth_middleware::auth_middleware;
use crate::AppState;
use axum::{middleware, routing::get, Router};

/// Create API routes
pub fn create_api_routes(state: AppState) -> Router<AppState> {
    Router::<AppState>::new()
        .route("/v1/diagnostics", get(diagnostics))
        .route("/v1/sessions/:session_id", get(session_detail))
        .route("/v1/sessions/:session_id/document", get(session_document))
        .route("/v1/sessions/:session_id/versions", get(session_versions))
        .route("/v1/sessions/:session_id/versions/:version", get(session_version))
        .route("/v1/sessions/:session_id/events", get(session_events))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware)) // Applies to all routes added above
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
}
