//! Conversation insights HTTP API server.
//!
//! Exposes the ingestion and read surface over `insights-core`'s
//! admission controller, storage layer, and metrics
//! registry: conversation ingestion (single, bulk, NDJSON stream), insight
//! listing, trend aggregation, and operational `/health` + `/metrics`.

pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Builds the complete axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/conversations", post(routes::conversations::submit_one))
        .route(
            "/conversations/bulk",
            post(routes::conversations::submit_bulk),
        )
        .route(
            "/conversations/bulk/stream",
            post(routes::conversations::submit_bulk_stream),
        )
        .route("/insights", get(routes::insights::list_insights))
        .route("/trends", get(routes::trends::trends));

    Router::new()
        .nest("/api/v1", api)
        .route("/health", get(routes::health::health))
        .route("/metrics", get(routes::metrics::metrics))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
