//! Axum Router Configuration

use crate::{worker::Worker, ws::ws_handler};
use axum::{Router, routing::get};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Liveness check.
pub async fn healthz() -> &'static str {
    "ok"
}

/// Creates the worker's router: `/ws` for agent jobs and `/healthz`.
pub fn create_router(worker: Arc<Worker>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/healthz", get(healthz))
        .with_state(worker)
        .layer(cors)
}
