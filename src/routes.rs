//! Route definitions and router setup
//!
//! Configures all API routes and middleware.

mod extract;
mod finding;
mod snapshot;
mod trend;

use crate::config::Settings;
use crate::models::HealthResponse;
use crate::state::SharedState;
use axum::{
    extract::State,
    http::{header, Method, StatusCode},
    routing::{get, put},
    Json, Router,
};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    request_id::MakeRequestUuid,
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
    ServiceBuilderExt,
};
use tracing::Level;

/// Create the application router with all routes and middleware
pub fn create_router(state: SharedState, settings: &Settings) -> Router {
    // Build CORS layer
    let cors = build_cors_layer(settings);

    // Build tracing/logging layer
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    // Build middleware stack
    let middleware = ServiceBuilder::new()
        .set_x_request_id(MakeRequestUuid)
        .layer(trace_layer)
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(timeout_layer(settings))
        .propagate_x_request_id();

    // Build the router
    Router::new()
        // Health check
        .route("/health", get(health_check))

        // Snapshot routes
        .route("/api/snapshots", get(snapshot::list_snapshots).post(snapshot::create_snapshot))
        .route("/api/snapshots/{id}", get(snapshot::get_snapshot).delete(snapshot::delete_snapshot))
        .route("/api/snapshots/{id}/annotation", put(snapshot::annotate_snapshot))
        .route("/api/snapshots/{base}/compare/{target}", get(snapshot::compare_snapshots))

        // Trend routes
        .route("/api/trends/{metric}", get(trend::get_trend))
        .route("/api/forecasts/{metric}", get(trend::get_forecast))
        .route("/api/files/{path}/trend/{metric}", get(trend::get_file_trend))

        // Finding routes
        .route("/api/findings/chronic", get(finding::list_chronic))
        .route("/api/findings/{id}/lifecycle", get(finding::get_lifecycle))

        // Apply middleware and state
        .layer(middleware)
        .with_state(state)
}

/// Build CORS layer from settings
fn build_cors_layer(settings: &Settings) -> CorsLayer {
    let origins: Vec<_> = settings
        .cors
        .allowed_origins
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect();

    let cors = if origins.is_empty() {
        CorsLayer::new().allow_origin(Any)
    } else {
        CorsLayer::new().allow_origin(origins)
    };

    cors.allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .max_age(Duration::from_secs(3600))
}

/// Requests still running after the configured timeout get a 408
fn timeout_layer(settings: &Settings) -> TimeoutLayer {
    TimeoutLayer::with_status_code(
        StatusCode::REQUEST_TIMEOUT,
        Duration::from_secs(settings.server.request_timeout_secs),
    )
}

/// Health check endpoint
async fn health_check(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        success: true,
        message: "Server is running fine.".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        version: env!("CARGO_PKG_VERSION"),
        snapshot_count: state.store.len().await,
        persistent: state.persistent,
    })
}
