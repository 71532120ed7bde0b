//! `api` crate: HTTP REST API layer.
//!
//! Exposes:
//!   POST   /api/v1/workflows/{id}/execute
//!   POST   /api/v1/webhook/{slug}
//!   POST   /api/v1/events/{event}
//!   GET    /api/v1/executions/{id}
//!   POST   /api/v1/executions/{id}/cancel

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use engine::WorkflowEngine;

mod error;
pub mod handlers;

pub use error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<WorkflowEngine>,
}

impl AppState {
    pub fn new(engine: Arc<WorkflowEngine>) -> Self {
        Self { engine }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/workflows/:id/execute", post(handlers::workflows::execute))
        .route("/api/v1/webhook/:slug", post(handlers::webhooks::handle_webhook))
        .route("/api/v1/events/:event", post(handlers::webhooks::dispatch_event))
        .route("/api/v1/executions/:id", get(handlers::executions::get))
        .route("/api/v1/executions/:id/cancel", post(handlers::executions::cancel))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind `bind` and serve until the process is stopped.
pub async fn serve(bind: &str, state: AppState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("API listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state)).await
}
