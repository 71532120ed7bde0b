use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use engine::{ExecutionOutcome, TriggerRequest};

use super::AppState;
use crate::ApiError;

#[derive(Debug, Default, Deserialize)]
pub struct ExecuteWorkflowDto {
    /// Trigger payload for the run.
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub variables: Option<Map<String, Value>>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
}

/// Run a workflow manually and wait for it to finish.
pub async fn execute(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    payload: Option<Json<ExecuteWorkflowDto>>,
) -> Result<Json<ExecutionOutcome>, ApiError> {
    let payload = payload.map(|Json(p)| p).unwrap_or_default();

    let input = match payload.input {
        Value::Null => Value::Object(Map::new()),
        other => other,
    };
    let mut request = TriggerRequest::manual(input);
    if let Some(user_id) = payload.user_id {
        request = request.with_user(user_id);
    }
    if let Some(agent_id) = payload.agent_id {
        request = request.with_agent(agent_id);
    }
    if let Some(variables) = payload.variables {
        request = request.with_variables(variables);
    }

    let outcome = state.engine.execute_workflow(id, request).await?;
    Ok(Json(outcome))
}
