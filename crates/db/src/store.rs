//! Repository traits consumed by the engine and the primitive adapter.
//!
//! [`PgStore`] forwards to the per-table functions in [`crate::repository`];
//! [`crate::MemoryStore`] is the in-process implementation used by tests and
//! file-driven runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    models::{
        ExecutionFinish, NewExecution, NewPrimitiveExecution, PrimitiveRow, WorkflowExecutionRow,
        WorkflowRow,
    },
    repository::{executions, primitives, workflows},
    DbError, DbPool,
};

/// Workflow definitions and execution records.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn find_workflow(&self, id: Uuid) -> Result<Option<WorkflowRow>, DbError>;

    async fn find_workflow_by_slug(&self, slug: &str) -> Result<Option<WorkflowRow>, DbError>;

    /// Enabled workflows whose trigger type equals `trigger_type`.
    async fn list_enabled_by_trigger(&self, trigger_type: &str) -> Result<Vec<WorkflowRow>, DbError>;

    async fn touch_last_run(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), DbError>;

    async fn create_execution(&self, new: NewExecution) -> Result<WorkflowExecutionRow, DbError>;

    /// Apply a terminal transition. Returns `false` if the execution was no
    /// longer `RUNNING` or does not exist.
    async fn finish_execution(&self, id: Uuid, finish: ExecutionFinish) -> Result<bool, DbError>;

    async fn get_execution(&self, id: Uuid) -> Result<Option<WorkflowExecutionRow>, DbError>;
}

/// Primitive definitions and their invocation audit log.
#[async_trait]
pub trait PrimitiveStore: Send + Sync {
    async fn find_primitive(&self, id: Uuid) -> Result<Option<PrimitiveRow>, DbError>;

    async fn find_primitive_by_name(&self, name: &str) -> Result<Option<PrimitiveRow>, DbError>;

    async fn insert_primitive_execution(&self, record: NewPrimitiveExecution) -> Result<(), DbError>;
}

/// Postgres-backed store.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl WorkflowStore for PgStore {
    async fn find_workflow(&self, id: Uuid) -> Result<Option<WorkflowRow>, DbError> {
        workflows::find_workflow(&self.pool, id).await
    }

    async fn find_workflow_by_slug(&self, slug: &str) -> Result<Option<WorkflowRow>, DbError> {
        workflows::find_workflow_by_slug(&self.pool, slug).await
    }

    async fn list_enabled_by_trigger(&self, trigger_type: &str) -> Result<Vec<WorkflowRow>, DbError> {
        workflows::list_enabled_by_trigger(&self.pool, trigger_type).await
    }

    async fn touch_last_run(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), DbError> {
        workflows::touch_last_run(&self.pool, id, at).await
    }

    async fn create_execution(&self, new: NewExecution) -> Result<WorkflowExecutionRow, DbError> {
        executions::create_execution(&self.pool, &new).await
    }

    async fn finish_execution(&self, id: Uuid, finish: ExecutionFinish) -> Result<bool, DbError> {
        executions::finish_execution(&self.pool, id, &finish).await
    }

    async fn get_execution(&self, id: Uuid) -> Result<Option<WorkflowExecutionRow>, DbError> {
        executions::get_execution(&self.pool, id).await
    }
}

#[async_trait]
impl PrimitiveStore for PgStore {
    async fn find_primitive(&self, id: Uuid) -> Result<Option<PrimitiveRow>, DbError> {
        primitives::find_primitive(&self.pool, id).await
    }

    async fn find_primitive_by_name(&self, name: &str) -> Result<Option<PrimitiveRow>, DbError> {
        primitives::find_primitive_by_name(&self.pool, name).await
    }

    async fn insert_primitive_execution(&self, record: NewPrimitiveExecution) -> Result<(), DbError> {
        primitives::insert_primitive_execution(&self.pool, &record).await?;
        Ok(())
    }
}
