use crate::{models::{ApiError, DiagnosticsResponse}, services::auth_service::Identity, AppState};
use axum::{extract::{State, Extension}, http::StatusCode, Json};
use std::sync::{Mutex, OnceLock};
use sysinfo::System;
use tracing::info;

static SYSTEM_MONITOR: OnceLock<Mutex<System>> = OnceLock::new();

/// Engine and host statistics
pub async fn diagnostics(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<(StatusCode, Json<DiagnosticsResponse>), ApiError> {

    let stats = state.hub.stats().await;
    let n_cached_identities = state.auth.cached_identities() as u32;

    // System stats
    let (cpu_usage, memory_alloc, memory_free, memory_total) = {
        let sys_lock = SYSTEM_MONITOR.get_or_init(|| {
            Mutex::new(System::new_all())
        });
        match sys_lock.lock() {
            Ok(mut sys) => {
                sys.refresh_cpu();
                sys.refresh_memory();
                (
                    sys.global_cpu_info().cpu_usage(),
                    sys.used_memory(),
                    sys.free_memory(),
                    sys.total_memory(),
                )
            }
            Err(_) => (0.0, 0, 0, 0)
        }
    };

    info!(
        "Diagnostics for {}: CPU: {:.2}%, Mem: {}/{} MB (Free: {} MB), Conn: {}, Sessions: {}, Docs: {}",
        identity.user_id,
        cpu_usage,
        memory_alloc / 1024 / 1024,
        memory_total / 1024 / 1024,
        memory_free / 1024 / 1024,
        stats.connections,
        stats.sessions,
        stats.loaded_documents
    );

    Ok((
        StatusCode::OK,
        Json(DiagnosticsResponse {
            n_conn: stats.connections as u32,
            n_authenticated: stats.authenticated as u32,
            n_sessions: stats.sessions as u32,
            n_loaded_docs: stats.loaded_documents as u32,
            n_dirty_docs: stats.dirty_documents as u32,
            n_cached_identities,
            cpu_usage,
            memory_alloc,
            memory_total,
            memory_free,
        }),
    ))
}
