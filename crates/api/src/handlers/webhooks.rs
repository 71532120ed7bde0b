use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};
use tracing::info;

use engine::ExecutionOutcome;

use super::AppState;
use crate::ApiError;

/// Run the webhook-triggered workflow registered under `slug`.
pub async fn handle_webhook(
    Path(slug): Path<String>,
    State(state): State<AppState>,
    payload: Option<Json<Value>>,
) -> Result<Json<ExecutionOutcome>, ApiError> {
    let payload = payload.map(|Json(v)| v).unwrap_or_else(|| json!({}));
    info!("webhook received for '{}'", slug);

    let outcome = state.engine.execute_webhook(&slug, payload).await?;
    Ok(Json(outcome))
}

/// Dispatch an application event to every subscribed workflow.
pub async fn dispatch_event(
    Path(event): Path<String>,
    State(state): State<AppState>,
    payload: Option<Json<Value>>,
) -> Result<Json<Vec<ExecutionOutcome>>, ApiError> {
    let payload = payload.map(|Json(v)| v).unwrap_or_else(|| json!({}));

    let outcomes = state.engine.dispatch_event(&event, payload).await?;
    Ok(Json(outcomes))
}
