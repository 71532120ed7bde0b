//! Primitive lookups and the primitive-execution audit table.

use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    models::{NewPrimitiveExecution, PrimitiveExecutionRow, PrimitiveRow},
    DbError,
};

const PRIMITIVE_COLUMNS: &str =
    "id, name, category, input_schema, timeout_ms, enabled, version, created_at";

/// Fetch a primitive by its primary key.
pub async fn find_primitive(pool: &PgPool, id: Uuid) -> Result<Option<PrimitiveRow>, DbError> {
    let row = sqlx::query_as::<_, PrimitiveRow>(&format!(
        "SELECT {PRIMITIVE_COLUMNS} FROM primitives WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Fetch a primitive by its unique name.
pub async fn find_primitive_by_name(
    pool: &PgPool,
    name: &str,
) -> Result<Option<PrimitiveRow>, DbError> {
    let row = sqlx::query_as::<_, PrimitiveRow>(&format!(
        "SELECT {PRIMITIVE_COLUMNS} FROM primitives WHERE name = $1"
    ))
    .bind(name)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Append an audit row for one primitive invocation.
pub async fn insert_primitive_execution(
    pool: &PgPool,
    record: &NewPrimitiveExecution,
) -> Result<PrimitiveExecutionRow, DbError> {
    let row = sqlx::query_as::<_, PrimitiveExecutionRow>(
        r#"
        INSERT INTO primitive_executions
            (id, primitive_id, execution_id, workflow_id, node_id, input, output,
             success, error, started_at, finished_at, duration_ms)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        RETURNING id, primitive_id, execution_id, workflow_id, node_id, input, output,
                  success, error, started_at, finished_at, duration_ms
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(record.primitive_id)
    .bind(record.execution_id)
    .bind(record.workflow_id)
    .bind(&record.node_id)
    .bind(&record.input)
    .bind(&record.output)
    .bind(record.success)
    .bind(&record.error)
    .bind(record.started_at)
    .bind(record.finished_at)
    .bind(record.duration_ms)
    .fetch_one(pool)
    .await?;

    Ok(row)
}
