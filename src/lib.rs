//! metricwatch -- anomaly detection and alert lifecycle for daily business metrics.
//!
//! This crate provides the detector ensemble, the deduplicating alert store,
//! SQLite persistence, and the HTTP API used by dashboards and schedulers.

pub mod api;
pub mod config;
pub mod detect;
pub mod storage;

use anyhow::{Context, Result};
use config::AppConfig;

/// Start the metricwatch daemon: storage, detection engine, and API server.
pub async fn serve(config: AppConfig) -> Result<()> {
    // 1. Initialize Storage
    let db_path = config.storage.db_path.clone();
    tracing::info!(db_path = %db_path.display(), "Initializing database");
    let pool = storage::open_pool(&db_path)?;

    // 2. Build the engine and API state
    let state = api::state::AppState {
        engine: detect::engine::DetectionEngine::from_pool(pool.clone(), &config),
        records: storage::records::SqliteSeriesProvider::new(pool),
    };

    // 3. Start API Server
    let addr: std::net::SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address '{}'", config.server.bind))?;
    let app = api::router(state);

    tracing::info!(%addr, "metricwatch listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
