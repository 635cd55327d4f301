use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use tracing::{debug, error};
use crate::services::auth_service::get_auth_token;
use crate::AppState;

/// Verify the caller and expose its `Identity` to downstream handlers
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {

    // Get the auth token from the header or the cookie
    let token = match get_auth_token(&req) {
        Ok(token) => token,
        Err(e) => {
            debug!("Rejecting {} without credentials: {}", req.uri().path(), e);
            return Err(StatusCode::UNAUTHORIZED);
        }
    };

    // Validate it the same way the websocket auth message is validated
    let identity = match state.auth.verify(&token, None, None) {
        Ok(identity) => identity,
        Err(e) => {
            error!("Token validation failed: {}", e);
            return Err(StatusCode::UNAUTHORIZED);
        }
    };

    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}
