mod models;
mod handlers;
mod routes;
mod docs;
mod config;
mod crdt;
mod db;
mod services;
mod ws;

use axum::{http::HeaderValue, routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use routes::create_api_routes;
use docs::ApiDoc;
use config::Config;
use crdt::LoroMergeEngine;
use db::{CollabStore, MemoryCollabStore, PgCollabStore};
use services::auth_service::Authenticator;
use ws::{CollabHub, HubSettings, Supervisor, SupervisorSettings};
use tracing::{info, error, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use std::panic;
use std::sync::Arc;

/// Shared state of every route
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<CollabHub>,
    pub store: Arc<dyn CollabStore>,
    pub auth: Arc<Authenticator>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn CollabStore>) -> Self {
        let auth = Arc::new(Authenticator::new(config.auth_jwt_secret.clone(), config.auth_dev_token.clone()));
        let hub = Arc::new(CollabHub::new(
            HubSettings::from_config(&config),
            store.clone(),
            Arc::new(LoroMergeEngine),
            auth.clone(),
        ));
        Self {
            hub,
            store,
            auth,
            config: Arc::new(config),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {

    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            // Default to info level, but allow debug for our app
            "fieldnote_collab=debug,tower_http=debug,axum::rejection=trace,info".into()
        }))
        .init();

    info!("Starting server...");

    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        error!("Failed to load configuration: {}", e);
        warn!("Using default configuration");
        Config::default()
    });

    let store = open_store(&config).await;
    let state = AppState::new(config, store);
    let address = state.config.server_address();

    let supervisor = Supervisor::start(state.hub.clone(), SupervisorSettings::from_config(&state.config));
    let app_routes = build_app(state.clone());

    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .unwrap_or_else(|_| panic!("Failed to bind to {}", address));

    info!("🚀 Server running on http://{}", address);
    info!("📡 WebSocket available at ws://{}{}", address, state.config.ws_path);
    info!("📚 Swagger UI available at http://{}/swagger", address);

    axum::serve(listener, app_routes)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server failed to start");

    // No sockets left, flush what is still unsaved
    supervisor.stop().await;
    let saved = state.hub.persist_dirty("shutdown").await;
    info!("Shutdown complete, {} documents persisted", saved);
}

/// Postgres when configured and reachable, the in-process store otherwise
async fn open_store(config: &Config) -> Arc<dyn CollabStore> {
    let Some(db_url) = &config.db_url else {
        warn!("No database URL configured - sessions and versions live in memory only");
        return Arc::new(MemoryCollabStore::new());
    };
    let store = match PgCollabStore::connect(db_url).await {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            warn!("Falling back to the in-memory store");
            return Arc::new(MemoryCollabStore::new());
        }
    };
    if let Err(e) = store.migrate().await {
        error!("Failed to prepare database schema: {}", e);
        warn!("Falling back to the in-memory store");
        return Arc::new(MemoryCollabStore::new());
    }
    info!("Database initialized successfully");
    Arc::new(store)
}

/// Router with the websocket endpoint, the API and the Swagger UI
pub fn build_app(state: AppState) -> Router {
    let cors = match state.config.cors_origin_list() {
        Some(origins) => {
            let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            CorsLayer::new().allow_origin(origins).allow_methods(Any).allow_headers(Any)
        }
        None => CorsLayer::permissive(),
    };

    Router::new()
        .route(&state.config.ws_path, get(ws::handler::websocket_handler))
        // Mount API routes
        .nest("/api", create_api_routes(state.clone()))
        .with_state(state)
        // Mount Swagger UI
        .merge(SwaggerUi::new("/swagger").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(cors)
        // Add tracing layer
        .layer(TraceLayer::new_for_http())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
