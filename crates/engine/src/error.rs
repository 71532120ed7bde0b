//! Engine-level error types.

use thiserror::Error;
use uuid::Uuid;

use primitives::PrimitiveError;

/// Errors produced by the workflow engine (validation, lifecycle and
/// node execution).
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Validation errors ------

    /// Two or more nodes share the same ID.
    #[error("duplicate node ID: '{0}'")]
    DuplicateNodeId(String),

    /// An edge references a node ID that doesn't exist in the workflow.
    #[error("edge references unknown node '{node_id}' ({side} side)")]
    UnknownNodeReference {
        node_id: String,
        side: &'static str,
    },

    /// Topological sort detected a cycle.
    #[error("workflow graph contains a cycle")]
    CycleDetected,

    #[error("workflow has no trigger node")]
    MissingTrigger,

    #[error("workflow has {0} trigger nodes, expected exactly one")]
    MultipleTriggers(usize),

    /// Stored definition could not be decoded.
    #[error("invalid workflow definition: {0}")]
    InvalidDefinition(String),

    // ------ Lifecycle errors ------

    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("workflow {0} is disabled")]
    WorkflowDisabled(Uuid),

    #[error("workflow '{workflow}' is not {expected}-triggered (found {actual})")]
    TriggerMismatch {
        workflow: String,
        expected: &'static str,
        actual: &'static str,
    },

    // ------ Execution errors ------

    #[error("node not found: '{0}'")]
    NodeNotFound(String),

    #[error("node '{node_id}' has invalid config: {message}")]
    InvalidNodeConfig { node_id: String, message: String },

    /// A loop's collection did not resolve to a list.
    #[error("loop '{node_id}' expected a list, found {found}")]
    LoopType {
        node_id: String,
        found: &'static str,
    },

    #[error("loop '{node_id}' failed at iteration {index}: {source}")]
    LoopIteration {
        node_id: String,
        index: usize,
        #[source]
        source: Box<EngineError>,
    },

    #[error("parallel '{node_id}' branch '{branch}' failed: {source}")]
    ParallelBranch {
        node_id: String,
        branch: String,
        #[source]
        source: Box<EngineError>,
    },

    #[error("node '{node_id}': {source}")]
    Primitive {
        node_id: String,
        #[source]
        source: PrimitiveError,
    },

    #[error("execution cancelled")]
    Cancelled,

    /// The spawned run task panicked or was aborted.
    #[error("execution {execution_id} aborted: {message}")]
    RunAborted { execution_id: Uuid, message: String },

    /// Persistence error from the db crate.
    #[error("database error: {0}")]
    Database(#[from] db::DbError),
}

impl EngineError {
    pub(crate) fn invalid_config(node_id: &str, message: impl std::fmt::Display) -> Self {
        EngineError::InvalidNodeConfig {
            node_id: node_id.to_string(),
            message: message.to_string(),
        }
    }

    /// True when this error, or the branch/iteration error it wraps, is a
    /// cancellation.
    pub fn is_cancellation(&self) -> bool {
        match self {
            EngineError::Cancelled => true,
            EngineError::LoopIteration { source, .. }
            | EngineError::ParallelBranch { source, .. } => source.is_cancellation(),
            _ => false,
        }
    }
}
