//! Web server setup and routing

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::api;
use crate::state::AppState;
use crate::ws;

/// Build the API router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/discovery", post(api::discover))
        .route("/api/discovery/segments", post(api::discover_all_segments))
        .route("/api/discovery/segments/{name}", post(api::discover_segment))
        .route("/api/devices/{ip}/identify", get(api::identify_device))
        .route("/api/devices/{ip}/reachable", get(api::device_reachable))
        .route("/api/segments", get(api::list_segments))
        // WebSocket for real-time updates
        .route("/ws", get(ws::websocket_handler))
        .layer(
            ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            ),
        )
        .with_state(state)
}

/// Run the scheduler and the HTTP server on `daemon.bind` until Ctrl-C
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let app = router(state.clone());
    let bind = state.config.daemon.bind.clone();

    // Start scheduled discovery in background
    let scheduler = state.scheduler.clone();
    let scheduler_token = state.shutdown.clone();
    let scheduler_task = tokio::spawn(async move { scheduler.run(scheduler_token).await });

    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => error!(error = %e, "Failed to listen for Ctrl-C"),
        }
        shutdown.cancel();
    });

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(address = %bind, "Starting API server");

    let shutdown = state.shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    if let Err(e) = scheduler_task.await {
        error!(error = %e, "Discovery scheduler task failed");
    }
    info!("Server stopped");
    Ok(())
}
