use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use db::models::WorkflowExecutionRow;

use super::AppState;
use crate::ApiError;

pub async fn get(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<WorkflowExecutionRow>, ApiError> {
    match state.engine.get_execution(id).await? {
        Some(row) => Ok(Json(row)),
        None => Err(ApiError::ExecutionNotFound(id)),
    }
}

/// Cancel a running execution.  `cancelled` is false when the execution had
/// already reached a terminal state.
pub async fn cancel(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<Value>, ApiError> {
    if state.engine.get_execution(id).await?.is_none() {
        return Err(ApiError::ExecutionNotFound(id));
    }
    let cancelled = state.engine.cancel_execution(id).await?;
    Ok(Json(json!({ "execution_id": id, "cancelled": cancelled })))
}
