//! CodePulse API - Temporal Analysis Store for Code Health
//!
//! Keeps the history of a codebase's health snapshots and answers questions
//! across time: what did it look like then, what changed between two runs,
//! which findings never go away, and where is the trend heading.
//!
//! STORAGE: snapshots live in memory. When DATABASE_URL is set they are
//! also written through to Postgres and reloaded on startup.

mod config;
mod db;
mod error;
mod models;
mod query;
mod routes;
mod snapshot;
mod state;
mod trend;

use crate::config::Settings;
use crate::db::SnapshotRepository;
use crate::routes::create_router;
use crate::snapshot::SnapshotStore;
use crate::state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber for structured logging
    init_tracing();

    info!("🚀 Starting CodePulse - Temporal Analysis Store...");

    // Load configuration
    let settings = Settings::load()?;
    info!("📋 Configuration loaded successfully");

    let analysis = settings.analysis;
    let state = match &settings.database {
        Some(database) => match SnapshotRepository::connect(database).await {
            Ok(repository) => {
                let store = SnapshotStore::with_repository(repository, analysis.cache_capacity).await?;
                Arc::new(AppState::new(Arc::new(store), analysis, true))
            }
            Err(e) => {
                error!("❌ Failed to connect to snapshot database: {}", e);
                warn!("⚠️  Falling back to in-memory storage; snapshots will not survive a restart");
                Arc::new(AppState::in_memory(analysis))
            }
        },
        None => {
            warn!("⚠️  DATABASE_URL not set, snapshots are kept in memory only");
            Arc::new(AppState::in_memory(analysis))
        }
    };

    info!(
        "🔧 Analysis: chronic after {} snapshots, rename threshold {}, velocity window {}",
        analysis.chronic_after, analysis.rename_threshold, analysis.velocity_window
    );

    // Build the router
    let app = create_router(state, &settings);

    // Create socket address
    let addr = SocketAddr::from((settings.server.host, settings.server.port));

    info!("🌐 Server listening on http://{}", addr);
    info!("");
    info!("📚 API Endpoints:");
    info!("   ─── Snapshots ───");
    info!("   GET    /api/snapshots                        - List snapshots (from, to, after, limit)");
    info!("   POST   /api/snapshots                        - Append snapshot (?overwrite=true)");
    info!("   GET    /api/snapshots/{{id}}                   - Fetch snapshot");
    info!("   DELETE /api/snapshots/{{id}}                   - Delete snapshot");
    info!("   PUT    /api/snapshots/{{id}}/annotation        - Annotate snapshot");
    info!("   GET    /api/snapshots/{{base}}/compare/{{target}} - Compare snapshots");
    info!("");
    info!("   ─── Trends ───");
    info!("   GET    /api/trends/{{metric}}                  - Series and velocity");
    info!("   GET    /api/forecasts/{{metric}}               - Advisory forecast");
    info!("");
    info!("   ─── Findings ───");
    info!("   GET    /api/findings/chronic                 - Chronic findings");
    info!("   GET    /api/findings/{{id}}/lifecycle          - Finding history");
    info!("");

    // Create TCP listener and serve
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("👋 Server shutdown complete");
    Ok(())
}

/// Initialize tracing with structured logging
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,codepulse_api=debug,tower_http=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .compact(),
        )
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("📴 Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("📴 Received terminate signal, initiating graceful shutdown...");
        },
    }
}
