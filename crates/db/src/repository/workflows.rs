//! Workflow queries.
//!
//! Definitions are authored by the surrounding application; the engine only
//! reads them and stamps `last_run_at`.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{models::WorkflowRow, DbError};

const WORKFLOW_COLUMNS: &str =
    "id, name, slug, definition, enabled, trigger_type, last_run_at, created_at";

/// Insert a new workflow into the database.
///
/// `definition` must be a valid JSON object produced by serialising the
/// domain `WorkflowDefinition` type from the `engine` crate.
pub async fn create_workflow(pool: &PgPool, row: &WorkflowRow) -> Result<WorkflowRow, DbError> {
    let row = sqlx::query_as::<_, WorkflowRow>(&format!(
        r#"
        INSERT INTO workflows (id, name, slug, definition, enabled, trigger_type, last_run_at, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING {WORKFLOW_COLUMNS}
        "#
    ))
    .bind(row.id)
    .bind(&row.name)
    .bind(&row.slug)
    .bind(&row.definition)
    .bind(row.enabled)
    .bind(&row.trigger_type)
    .bind(row.last_run_at)
    .bind(row.created_at)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Fetch a single workflow by its primary key.
pub async fn find_workflow(pool: &PgPool, id: Uuid) -> Result<Option<WorkflowRow>, DbError> {
    let row = sqlx::query_as::<_, WorkflowRow>(&format!(
        "SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Fetch a single workflow by its slug.
pub async fn find_workflow_by_slug(pool: &PgPool, slug: &str) -> Result<Option<WorkflowRow>, DbError> {
    let row = sqlx::query_as::<_, WorkflowRow>(&format!(
        "SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE slug = $1"
    ))
    .bind(slug)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Return enabled workflows with the given trigger type, oldest first.
pub async fn list_enabled_by_trigger(
    pool: &PgPool,
    trigger_type: &str,
) -> Result<Vec<WorkflowRow>, DbError> {
    let rows = sqlx::query_as::<_, WorkflowRow>(&format!(
        r#"
        SELECT {WORKFLOW_COLUMNS} FROM workflows
        WHERE enabled = TRUE AND trigger_type = $1
        ORDER BY created_at ASC
        "#
    ))
    .bind(trigger_type)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Stamp the time of the last successful run.
///
/// Returns `DbError::NotFound` if no row was updated.
pub async fn touch_last_run(pool: &PgPool, id: Uuid, at: DateTime<Utc>) -> Result<(), DbError> {
    let result = sqlx::query("UPDATE workflows SET last_run_at = $1 WHERE id = $2")
        .bind(at)
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }

    Ok(())
}
