//! Workflow execution repository functions.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    models::{ExecutionFinish, ExecutionStatus, NewExecution, WorkflowExecutionRow},
    DbError,
};

const EXECUTION_COLUMNS: &str = "id, workflow_id, status, triggered_by, user_id, agent_id, \
     trigger_data, result, error, started_at, finished_at";

/// Create a new workflow execution record in `RUNNING` status.
pub async fn create_execution(
    pool: &PgPool,
    new: &NewExecution,
) -> Result<WorkflowExecutionRow, DbError> {
    let id = Uuid::new_v4();
    let now = Utc::now();

    let row = sqlx::query_as::<_, WorkflowExecutionRow>(&format!(
        r#"
        INSERT INTO workflow_executions
            (id, workflow_id, status, triggered_by, user_id, agent_id, trigger_data, started_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING {EXECUTION_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(new.workflow_id)
    .bind(ExecutionStatus::Running.as_str())
    .bind(&new.triggered_by)
    .bind(&new.user_id)
    .bind(&new.agent_id)
    .bind(&new.trigger_data)
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Move a `RUNNING` execution into a terminal state.
///
/// Returns `false` when the row was already terminal (for example after a
/// cancellation), in which case nothing is written.
pub async fn finish_execution(
    pool: &PgPool,
    execution_id: Uuid,
    finish: &ExecutionFinish,
) -> Result<bool, DbError> {
    let result = sqlx::query(
        r#"
        UPDATE workflow_executions
        SET status = $1, result = $2, error = $3, finished_at = $4
        WHERE id = $5 AND status = 'RUNNING'
        "#,
    )
    .bind(finish.status.as_str())
    .bind(&finish.result)
    .bind(&finish.error)
    .bind(Utc::now())
    .bind(execution_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Fetch a single execution by its primary key.
pub async fn get_execution(
    pool: &PgPool,
    execution_id: Uuid,
) -> Result<Option<WorkflowExecutionRow>, DbError> {
    let row = sqlx::query_as::<_, WorkflowExecutionRow>(&format!(
        "SELECT {EXECUTION_COLUMNS} FROM workflow_executions WHERE id = $1"
    ))
    .bind(execution_id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}
