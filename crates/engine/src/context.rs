//! Per-invocation execution state.
//!
//! `ExecutionContext` is a value: every mutation returns a new context and
//! leaves the receiver untouched.  Fields are `Arc`-shared and copied on
//! write, so cloning a context for a loop iteration or a parallel branch is
//! cheap and the untouched parts stay shared.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// A node-level failure recorded on the context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextError {
    pub node_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    pub started_at: DateTime<Utc>,
    trigger: Arc<Value>,
    variables: Arc<Map<String, Value>>,
    node_outputs: Arc<Map<String, Value>>,
    executed_nodes: Arc<Vec<String>>,
    errors: Arc<Vec<ContextError>>,
}

impl ExecutionContext {
    pub fn new(
        execution_id: Uuid,
        workflow_id: Uuid,
        trigger: Value,
        variables: Map<String, Value>,
    ) -> Self {
        Self {
            execution_id,
            workflow_id,
            started_at: Utc::now(),
            trigger: Arc::new(trigger),
            variables: Arc::new(variables),
            node_outputs: Arc::new(Map::new()),
            executed_nodes: Arc::new(Vec::new()),
            errors: Arc::new(Vec::new()),
        }
    }

    pub fn with_started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn trigger(&self) -> &Value {
        &self.trigger
    }

    pub fn variables(&self) -> &Map<String, Value> {
        &self.variables
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn node_outputs(&self) -> &Map<String, Value> {
        &self.node_outputs
    }

    pub fn node_output(&self, node_id: &str) -> Option<&Value> {
        self.node_outputs.get(node_id)
    }

    pub fn executed_nodes(&self) -> &[String] {
        &self.executed_nodes
    }

    pub fn has_executed(&self, node_id: &str) -> bool {
        self.executed_nodes.iter().any(|id| id == node_id)
    }

    pub fn errors(&self) -> &[ContextError] {
        &self.errors
    }

    /// Output of the most recently executed node, provided it ran after the
    /// first `baseline` entries of `executed_nodes`.
    pub fn last_output_since(&self, baseline: usize) -> Option<&Value> {
        self.executed_nodes
            .get(baseline..)
            .and_then(|recent| recent.last())
            .and_then(|id| self.node_outputs.get(id))
    }

    /// Borrowed view used by the resolver and the expression interpreter.
    pub fn scope(&self) -> Scope<'_> {
        Scope {
            trigger: &self.trigger,
            variables: &self.variables,
            nodes: &self.node_outputs,
        }
    }

    // -----------------------------------------------------------------------
    // Copy-on-write updates
    // -----------------------------------------------------------------------

    /// Record `output` for `node_id` and append it to the executed list.
    pub fn with_node_output(&self, node_id: &str, output: Value) -> Self {
        let mut next = self.clone();
        Arc::make_mut(&mut next.node_outputs).insert(node_id.to_string(), output);
        Arc::make_mut(&mut next.executed_nodes).push(node_id.to_string());
        next
    }

    pub fn with_variable(&self, name: &str, value: Value) -> Self {
        let mut next = self.clone();
        Arc::make_mut(&mut next.variables).insert(name.to_string(), value);
        next
    }

    pub fn with_error(&self, node_id: &str, message: impl Into<String>) -> Self {
        let mut next = self.clone();
        Arc::make_mut(&mut next.errors).push(ContextError {
            node_id: node_id.to_string(),
            message: message.into(),
        });
        next
    }

    /// Bind a loop item (and optionally its index) as variables.
    pub fn with_loop_binding(
        &self,
        item_variable: &str,
        item: Value,
        index_variable: Option<&str>,
        index: usize,
    ) -> Self {
        let mut next = self.clone();
        let variables = Arc::make_mut(&mut next.variables);
        variables.insert(item_variable.to_string(), item);
        if let Some(index_variable) = index_variable {
            variables.insert(index_variable.to_string(), Value::from(index));
        }
        next
    }
}

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// A root of the path vocabulary.
#[derive(Debug, Clone, Copy)]
pub enum Root<'a> {
    Value(&'a Value),
    Map(&'a Map<String, Value>),
}

impl Root<'_> {
    pub fn to_value(self) -> Value {
        match self {
            Root::Value(v) => v.clone(),
            Root::Map(m) => Value::Object(m.clone()),
        }
    }
}

/// Read-only snapshot of the four path roots: `trigger`, `event` (an alias
/// of the trigger payload), `variables` and `nodes`.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    pub trigger: &'a Value,
    pub variables: &'a Map<String, Value>,
    pub nodes: &'a Map<String, Value>,
}

impl<'a> Scope<'a> {
    pub const ROOTS: [&'static str; 4] = ["trigger", "event", "variables", "nodes"];

    pub fn root(&self, name: &str) -> Option<Root<'a>> {
        match name {
            "trigger" | "event" => Some(Root::Value(self.trigger)),
            "variables" => Some(Root::Map(self.variables)),
            "nodes" => Some(Root::Map(self.nodes)),
            _ => None,
        }
    }
}
