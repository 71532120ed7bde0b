//! Row structs that map 1-to-1 onto database tables.
//!
//! These are *persistence* models: they carry no domain behaviour.
//! Domain types live in the `engine` and `primitives` crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::DbError;

// ---------------------------------------------------------------------------
// workflows
// ---------------------------------------------------------------------------

/// A persisted workflow definition row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowRow {
    pub id: Uuid,
    pub name: String,
    /// URL-safe identifier used by webhook triggers.
    pub slug: String,
    /// Full JSON workflow definition (nodes, edges, variables, trigger)
    pub definition: serde_json::Value,
    pub enabled: bool,
    /// Denormalised copy of the trigger type (`manual`, `webhook`, `schedule`, `event`).
    pub trigger_type: String,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// workflow_executions
// ---------------------------------------------------------------------------

/// Possible statuses for a workflow execution.
///
/// `Running` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = DbError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RUNNING"   => Ok(Self::Running),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED"    => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            other       => Err(DbError::InvalidStatus(other.to_string())),
        }
    }
}

/// A persisted workflow execution row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowExecutionRow {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub status: String,
    /// `manual`, `webhook`, `schedule` or `event`.
    pub triggered_by: String,
    pub user_id: Option<String>,
    pub agent_id: Option<String>,
    pub trigger_data: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl WorkflowExecutionRow {
    pub fn status(&self) -> Result<ExecutionStatus, DbError> {
        self.status.parse()
    }
}

/// Values needed to open a new execution in `RUNNING` state.
#[derive(Debug, Clone)]
pub struct NewExecution {
    pub workflow_id: Uuid,
    pub triggered_by: String,
    pub user_id: Option<String>,
    pub agent_id: Option<String>,
    pub trigger_data: serde_json::Value,
}

/// Terminal transition applied to a running execution.
#[derive(Debug, Clone)]
pub struct ExecutionFinish {
    pub status: ExecutionStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// primitives
// ---------------------------------------------------------------------------

/// A persisted primitive definition row.
///
/// The handler itself is not stored; it is resolved from the compiled
/// handler registry by `name` + `version`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PrimitiveRow {
    pub id: Uuid,
    pub name: String,
    pub category: String,
    pub input_schema: serde_json::Value,
    pub timeout_ms: i64,
    pub enabled: bool,
    pub version: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// primitive_executions
// ---------------------------------------------------------------------------

/// Audit record for a single primitive invocation.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PrimitiveExecutionRow {
    pub id: Uuid,
    pub primitive_id: Uuid,
    pub execution_id: Option<Uuid>,
    pub workflow_id: Option<Uuid>,
    pub node_id: Option<String>,
    pub input: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub success: bool,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
}

/// Audit values written after a primitive handler has been invoked.
#[derive(Debug, Clone)]
pub struct NewPrimitiveExecution {
    pub primitive_id: Uuid,
    pub execution_id: Option<Uuid>,
    pub workflow_id: Option<Uuid>,
    pub node_id: Option<String>,
    pub input: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub success: bool,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
}
