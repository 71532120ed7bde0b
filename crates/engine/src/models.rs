//! Core domain models for the workflow engine.
//!
//! These types are the source of truth for what a workflow looks like
//! in memory.  The graph part (nodes, edges, variables, trigger) is stored
//! in the JSONB `definition` column of the `workflows` table; identity and
//! bookkeeping live in their own columns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use db::models::WorkflowRow;

use crate::condition::Condition;
use crate::EngineError;

// ---------------------------------------------------------------------------
// Trigger
// ---------------------------------------------------------------------------

/// How a workflow is started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Triggered manually via the REST API or CLI.
    Manual,
    /// Triggered by an incoming HTTP request to `/webhook/{slug}`.
    Webhook,
    /// Triggered by an external poller when the cron expression matches.
    Schedule {
        /// Standard cron expression (5 fields).
        cron: String,
    },
    /// Triggered when the named application event is dispatched.
    Event { event: String },
}

impl Trigger {
    pub fn kind(&self) -> TriggerKind {
        match self {
            Trigger::Manual => TriggerKind::Manual,
            Trigger::Webhook => TriggerKind::Webhook,
            Trigger::Schedule { .. } => TriggerKind::Schedule,
            Trigger::Event { .. } => TriggerKind::Event,
        }
    }
}

/// Trigger type without its configuration; stored as `trigger_type` and
/// `triggered_by`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Manual,
    Webhook,
    Schedule,
    Event,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Manual => "manual",
            TriggerKind::Webhook => "webhook",
            TriggerKind::Schedule => "schedule",
            TriggerKind::Event => "event",
        }
    }
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// WorkflowNode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Trigger,
    Primitive,
    Condition,
    Loop,
    Delay,
    Parallel,
    Output,
}

/// A single step in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    /// Unique identifier within this workflow (referenced by edges).
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Per-type configuration, parsed by the node's executor at run time.
    #[serde(default)]
    pub config: Value,
}

impl WorkflowNode {
    pub fn new(id: impl Into<String>, node_type: NodeType, config: Value) -> Self {
        Self {
            id: id.into(),
            node_type,
            name: None,
            config,
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowEdge
// ---------------------------------------------------------------------------

/// Directed edge from one node to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEdge {
    pub source: String,
    pub target: String,
    /// `"true"` / `"false"` on condition nodes, `"body"` on loop nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    /// Guard evaluated against the context after the source node ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
}

impl WorkflowEdge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            source_handle: None,
            condition: None,
        }
    }

    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        self.source_handle = Some(handle.into());
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn handle(&self) -> Option<&str> {
        self.source_handle.as_deref()
    }
}

// ---------------------------------------------------------------------------
// WorkflowDefinition
// ---------------------------------------------------------------------------

/// The JSON stored in `workflows.definition`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct GraphDocument {
    trigger: Trigger,
    #[serde(default)]
    nodes: Vec<WorkflowNode>,
    #[serde(default)]
    edges: Vec<WorkflowEdge>,
    #[serde(default)]
    variables: Map<String, Value>,
}

/// A complete workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub slug: String,
    pub trigger: Trigger,
    pub nodes: Vec<WorkflowNode>,
    #[serde(default)]
    pub edges: Vec<WorkflowEdge>,
    /// Default variables, overridable per invocation.
    #[serde(default)]
    pub variables: Map<String, Value>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
}

fn enabled_by_default() -> bool {
    true
}

impl WorkflowDefinition {
    /// Convenience constructor for testing.
    pub fn new(
        name: impl Into<String>,
        trigger: Trigger,
        nodes: Vec<WorkflowNode>,
        edges: Vec<WorkflowEdge>,
    ) -> Self {
        let name = name.into();
        Self {
            id: Uuid::new_v4(),
            slug: slugify(&name),
            name,
            trigger,
            nodes,
            edges,
            variables: Map::new(),
            enabled: true,
            last_run_at: None,
        }
    }

    pub fn with_variables(mut self, variables: Map<String, Value>) -> Self {
        self.variables = variables;
        self
    }

    pub fn node(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Rebuild a definition from its stored row.
    pub fn from_row(row: WorkflowRow) -> Result<Self, EngineError> {
        let graph: GraphDocument = serde_json::from_value(row.definition).map_err(|e| {
            EngineError::InvalidDefinition(format!("workflow '{}': {e}", row.slug))
        })?;

        Ok(Self {
            id: row.id,
            name: row.name,
            slug: row.slug,
            trigger: graph.trigger,
            nodes: graph.nodes,
            edges: graph.edges,
            variables: graph.variables,
            enabled: row.enabled,
            last_run_at: row.last_run_at,
        })
    }

    /// Flatten into a row for persistence.
    pub fn to_row(&self) -> Result<WorkflowRow, EngineError> {
        let graph = GraphDocument {
            trigger: self.trigger.clone(),
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
            variables: self.variables.clone(),
        };
        let definition = serde_json::to_value(graph)
            .map_err(|e| EngineError::InvalidDefinition(e.to_string()))?;

        Ok(WorkflowRow {
            id: self.id,
            name: self.name.clone(),
            slug: self.slug.clone(),
            definition,
            enabled: self.enabled,
            trigger_type: self.trigger.kind().as_str().to_string(),
            last_run_at: self.last_run_at,
            created_at: Utc::now(),
        })
    }
}

/// Lowercase ASCII slug of `name`, used as the webhook path segment.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn definition_parses_from_json() {
        let def: WorkflowDefinition = serde_json::from_value(json!({
            "name": "Order follow-up",
            "slug": "order-follow-up",
            "trigger": { "type": "event", "event": "order.created" },
            "nodes": [
                { "id": "start", "type": "trigger" },
                { "id": "wait", "type": "delay", "config": { "days": 3 } }
            ],
            "edges": [
                { "source": "start", "target": "wait" },
                { "source": "wait", "target": "start", "source_handle": "x" }
            ]
        }))
        .unwrap();

        assert!(def.enabled);
        assert_eq!(def.trigger.kind(), TriggerKind::Event);
        assert_eq!(def.nodes[1].node_type, NodeType::Delay);
        assert_eq!(def.edges[1].handle(), Some("x"));
        assert!(def.variables.is_empty());
    }

    #[test]
    fn row_round_trip_keeps_graph() {
        let def = WorkflowDefinition::new(
            "Weekly Digest!",
            Trigger::Schedule { cron: "0 9 * * 1".into() },
            vec![WorkflowNode::new("t", NodeType::Trigger, Value::Null)],
            vec![],
        );
        assert_eq!(def.slug, "weekly-digest");

        let row = def.to_row().unwrap();
        assert_eq!(row.trigger_type, "schedule");

        let back = WorkflowDefinition::from_row(row).unwrap();
        assert_eq!(back.id, def.id);
        assert_eq!(back.trigger, def.trigger);
        assert_eq!(back.nodes, def.nodes);
    }

    #[test]
    fn malformed_row_is_an_invalid_definition() {
        let mut row = WorkflowDefinition::new("x", Trigger::Manual, vec![], vec![])
            .to_row()
            .unwrap();
        row.definition = json!({ "nodes": "nope" });
        assert!(matches!(
            WorkflowDefinition::from_row(row),
            Err(EngineError::InvalidDefinition(_))
        ));
    }
}
