mod api_doc;
mod auth;
mod error;
mod handlers;
mod routes;
mod state;

use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use waypoint_core::Config;
use waypoint_db::PgImagingRepository;
use waypoint_storage::{BlobStore, R2Storage};
use waypoint_worker::{EngineConfig, ProcessingEngine};

use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;

    let pool = waypoint_db::connect(&config.database_url).await?;
    let repo = Arc::new(PgImagingRepository::new(pool));
    let store: Arc<dyn BlobStore> = Arc::new(R2Storage::new(&config.blob)?);

    let engine = ProcessingEngine::new(repo, store.clone(), EngineConfig::from_config(&config));

    let state = Arc::new(AppState {
        engine: engine.clone(),
        store,
    });
    let router = routes::router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.server_port)).await?;
    tracing::info!(port = config.server_port, "waypoint api listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(engine))
        .await?;

    Ok(())
}

/// Wait for ctrl-c or SIGTERM, then stop the engine. In-flight jobs finish
/// their current durable step and are recovered on restart.
async fn shutdown_signal(engine: ProcessingEngine) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("installing ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("installing SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
    engine.shutdown().await;
}
