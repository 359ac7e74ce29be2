mod config;
mod db;
mod error;
mod handlers;
mod models;
mod services;
mod storage;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::db::Database;
use crate::services::ownership::HttpSignerRecovery;
use crate::services::{AnchorClient, SignerRecovery, Sweeper};
use crate::storage::{BlobStore, LocalBlobStore};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Arc<Config>,
    pub store: Arc<dyn BlobStore>,
    pub anchor: Arc<AnchorClient>,
    pub recovery: Arc<dyn SignerRecovery>,
    pub sweeper: Arc<Sweeper>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "anchorbox=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Anchorbox...");

    // Load configuration
    let config = Config::load()?;
    let config = Arc::new(config);
    tracing::info!("Configuration loaded");

    // Initialize database
    let db = Database::new(&config.database.path).await?;
    db.run_migrations().await?;
    tracing::info!("Database initialized");

    // Blob store
    let store: Arc<dyn BlobStore> = Arc::new(LocalBlobStore::new(&config.storage.local_path));

    // External collaborators
    let anchor = Arc::new(AnchorClient::from_config(&config.ledger));
    let recovery: Arc<dyn SignerRecovery> =
        Arc::new(HttpSignerRecovery::from_config(&config.recovery));

    // Reclamation sweeper
    let sweeper = Arc::new(Sweeper::new(
        db.clone(),
        store.clone(),
        Duration::from_secs(config.sweep.interval_secs),
    ));
    sweeper.start();

    // Create app state
    let state = AppState {
        db,
        config: config.clone(),
        store,
        anchor,
        recovery,
        sweeper: sweeper.clone(),
    };

    // Build router
    let app = create_router(state);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.stop();

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutdown signal received");
}

fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let routes = Router::new()
        .route("/files", post(handlers::file::upload_file))
        .route("/files/:token/preview", get(handlers::file::preview_file))
        .route("/files/:token/download", get(handlers::file::download_file))
        .route("/files/:id/delete", post(handlers::file::delete_file))
        .route("/verify/:hash", get(handlers::file::verify_hash))
        .route("/sweep", post(handlers::file::trigger_sweep));

    Router::new()
        .nest("/api/v1", routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
