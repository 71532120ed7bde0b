//! In-process [`WorkflowStore`] / [`PrimitiveStore`] implementation.
//!
//! Used by the engine's tests and by `cli run`, where a single definition is
//! executed from a file without a database.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::{
    models::{
        ExecutionFinish, ExecutionStatus, NewExecution, NewPrimitiveExecution,
        PrimitiveExecutionRow, PrimitiveRow, WorkflowExecutionRow, WorkflowRow,
    },
    DbError, PrimitiveStore, WorkflowStore,
};

#[derive(Debug, Default)]
pub struct MemoryStore {
    workflows: RwLock<Vec<WorkflowRow>>,
    executions: RwLock<HashMap<Uuid, WorkflowExecutionRow>>,
    primitives: RwLock<Vec<PrimitiveRow>>,
    audit: RwLock<Vec<PrimitiveExecutionRow>>,
    primitive_lookups: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a workflow row (matched by id).
    pub fn put_workflow(&self, row: WorkflowRow) {
        let mut workflows = self.workflows.write();
        workflows.retain(|w| w.id != row.id);
        workflows.push(row);
    }

    /// Insert or replace a primitive row (matched by id).
    pub fn put_primitive(&self, row: PrimitiveRow) {
        let mut primitives = self.primitives.write();
        primitives.retain(|p| p.id != row.id);
        primitives.push(row);
    }

    pub fn workflow(&self, id: Uuid) -> Option<WorkflowRow> {
        self.workflows.read().iter().find(|w| w.id == id).cloned()
    }

    pub fn executions(&self) -> Vec<WorkflowExecutionRow> {
        let mut rows: Vec<_> = self.executions.read().values().cloned().collect();
        rows.sort_by_key(|r| r.started_at);
        rows
    }

    /// Audit rows in insertion order.
    pub fn primitive_executions(&self) -> Vec<PrimitiveExecutionRow> {
        self.audit.read().clone()
    }

    /// Number of primitive lookups that reached this store.
    pub fn primitive_lookups(&self) -> usize {
        self.primitive_lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn find_workflow(&self, id: Uuid) -> Result<Option<WorkflowRow>, DbError> {
        Ok(self.workflow(id))
    }

    async fn find_workflow_by_slug(&self, slug: &str) -> Result<Option<WorkflowRow>, DbError> {
        Ok(self.workflows.read().iter().find(|w| w.slug == slug).cloned())
    }

    async fn list_enabled_by_trigger(&self, trigger_type: &str) -> Result<Vec<WorkflowRow>, DbError> {
        Ok(self
            .workflows
            .read()
            .iter()
            .filter(|w| w.enabled && w.trigger_type == trigger_type)
            .cloned()
            .collect())
    }

    async fn touch_last_run(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), DbError> {
        let mut workflows = self.workflows.write();
        let row = workflows.iter_mut().find(|w| w.id == id).ok_or(DbError::NotFound)?;
        row.last_run_at = Some(at);
        Ok(())
    }

    async fn create_execution(&self, new: NewExecution) -> Result<WorkflowExecutionRow, DbError> {
        let row = WorkflowExecutionRow {
            id: Uuid::new_v4(),
            workflow_id: new.workflow_id,
            status: ExecutionStatus::Running.to_string(),
            triggered_by: new.triggered_by,
            user_id: new.user_id,
            agent_id: new.agent_id,
            trigger_data: new.trigger_data,
            result: None,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        };
        self.executions.write().insert(row.id, row.clone());
        Ok(row)
    }

    async fn finish_execution(&self, id: Uuid, finish: ExecutionFinish) -> Result<bool, DbError> {
        let mut executions = self.executions.write();
        let Some(row) = executions.get_mut(&id) else {
            return Ok(false);
        };
        if row.status()?.is_terminal() {
            return Ok(false);
        }
        row.status = finish.status.to_string();
        row.result = finish.result;
        row.error = finish.error;
        row.finished_at = Some(Utc::now());
        Ok(true)
    }

    async fn get_execution(&self, id: Uuid) -> Result<Option<WorkflowExecutionRow>, DbError> {
        Ok(self.executions.read().get(&id).cloned())
    }
}

#[async_trait]
impl PrimitiveStore for MemoryStore {
    async fn find_primitive(&self, id: Uuid) -> Result<Option<PrimitiveRow>, DbError> {
        self.primitive_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.primitives.read().iter().find(|p| p.id == id).cloned())
    }

    async fn find_primitive_by_name(&self, name: &str) -> Result<Option<PrimitiveRow>, DbError> {
        self.primitive_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.primitives.read().iter().find(|p| p.name == name).cloned())
    }

    async fn insert_primitive_execution(&self, record: NewPrimitiveExecution) -> Result<(), DbError> {
        self.audit.write().push(PrimitiveExecutionRow {
            id: Uuid::new_v4(),
            primitive_id: record.primitive_id,
            execution_id: record.execution_id,
            workflow_id: record.workflow_id,
            node_id: record.node_id,
            input: record.input,
            output: record.output,
            success: record.success,
            error: record.error,
            started_at: record.started_at,
            finished_at: record.finished_at,
            duration_ms: record.duration_ms,
        });
        Ok(())
    }
}
