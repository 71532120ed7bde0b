//! Node executors and graph traversal.
//!
//! Traversal is a depth-first walk from the trigger node.  Each visited node
//! is dispatched on its type, its output is folded into a new
//! [`ExecutionContext`], and its outgoing edges are followed in declaration
//! order.  Loop and parallel nodes drive their own sub-traversals, so the
//! walk recurses through boxed futures.
//!
//! A failure aborts the current path only: the failing node is recorded in
//! the result collector and in the context's error list, and the error
//! travels back up to whoever started the path.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::{join_all, BoxFuture};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use primitives::{CallContext, PrimitiveAdapter, PrimitiveError, PrimitiveRef};

use crate::condition::{evaluate_condition, Condition};
use crate::config::EngineConfig;
use crate::context::ExecutionContext;
use crate::models::{NodeType, WorkflowDefinition, WorkflowEdge, WorkflowNode};
use crate::resolver::{resolve_input_mapping, resolve_value, InputMapping};
use crate::EngineError;

const BODY_HANDLE: &str = "body";

// ---------------------------------------------------------------------------
// Node results
// ---------------------------------------------------------------------------

/// Outcome of one node visit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRunResult {
    pub node_id: String,
    pub node_type: NodeType,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Execution-wide list of node results, shared by every path of a run.
#[derive(Debug, Clone, Default)]
pub struct ResultCollector {
    results: Arc<Mutex<Vec<NodeRunResult>>>,
}

impl ResultCollector {
    pub fn push(&self, result: NodeRunResult) {
        self.results.lock().push(result);
    }

    pub fn extend(&self, results: Vec<NodeRunResult>) {
        self.results.lock().extend(results);
    }

    /// Drain the collected results.
    pub fn take(&self) -> Vec<NodeRunResult> {
        std::mem::take(&mut *self.results.lock())
    }

    /// Output of the most recent successful result for a node of `node_type`.
    pub fn last_output_of(&self, node_type: NodeType) -> Option<Value> {
        self.results
            .lock()
            .iter()
            .rev()
            .find(|r| r.success && r.node_type == node_type)
            .and_then(|r| r.output.clone())
    }
}

// ---------------------------------------------------------------------------
// Node configs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct PrimitiveNodeConfig {
    #[serde(default)]
    primitive_id: Option<Uuid>,
    /// Lookup by name when no id is given.
    #[serde(default)]
    primitive: Option<String>,
    #[serde(default)]
    input_mapping: InputMapping,
    /// Static input; resolved mapping entries are merged over it.
    #[serde(default)]
    config: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct ConditionNodeConfig {
    condition: Condition,
}

#[derive(Debug, Clone, Deserialize)]
struct LoopNodeConfig {
    collection: String,
    #[serde(default = "default_item_variable")]
    item_variable: String,
    #[serde(default)]
    index_variable: Option<String>,
}

fn default_item_variable() -> String {
    "item".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct DelayNodeConfig {
    seconds: f64,
    minutes: f64,
    hours: f64,
    days: f64,
}

impl DelayNodeConfig {
    fn duration(&self) -> Option<Duration> {
        let total = self.seconds + self.minutes * 60.0 + self.hours * 3_600.0 + self.days * 86_400.0;
        Duration::try_from_secs_f64(total).ok()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct OutputNodeConfig {
    #[serde(default)]
    mapping: InputMapping,
}

fn parse_config<T: serde::de::DeserializeOwned>(node: &WorkflowNode) -> Result<T, EngineError> {
    let raw = match &node.config {
        Value::Null => Value::Object(Map::new()),
        other => other.clone(),
    };
    serde_json::from_value(raw).map_err(|e| EngineError::invalid_config(&node.id, e))
}

fn type_name(value: Option<&Value>) -> &'static str {
    match value {
        None => "nothing",
        Some(Value::Null) => "null",
        Some(Value::Bool(_)) => "boolean",
        Some(Value::Number(_)) => "number",
        Some(Value::String(_)) => "string",
        Some(Value::Array(_)) => "array",
        Some(Value::Object(_)) => "object",
    }
}

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

/// Index over a validated definition.
pub(crate) struct WorkflowGraph<'a> {
    nodes: HashMap<&'a str, &'a WorkflowNode>,
    outgoing: HashMap<&'a str, Vec<&'a WorkflowEdge>>,
}

impl<'a> WorkflowGraph<'a> {
    pub(crate) fn new(workflow: &'a WorkflowDefinition) -> Self {
        let nodes = workflow.nodes.iter().map(|n| (n.id.as_str(), n)).collect();
        let mut outgoing: HashMap<&str, Vec<&WorkflowEdge>> = HashMap::new();
        for edge in &workflow.edges {
            outgoing.entry(edge.source.as_str()).or_default().push(edge);
        }
        Self { nodes, outgoing }
    }

    pub(crate) fn node(&self, id: &str) -> Option<&'a WorkflowNode> {
        self.nodes.get(id).copied()
    }

    /// Outgoing edges in declaration order.
    pub(crate) fn outgoing(&self, id: &str) -> &[&'a WorkflowEdge] {
        self.outgoing.get(id).map(Vec::as_slice).unwrap_or(&[])
    }
}

// ---------------------------------------------------------------------------
// Traversal
// ---------------------------------------------------------------------------

/// A path that stopped on an error.
#[derive(Debug)]
pub(crate) struct PathFailure {
    pub node_id: String,
    pub error: EngineError,
    /// Context as it stood when the path failed, error recorded.
    pub context: ExecutionContext,
}

pub(crate) type PathResult = Result<ExecutionContext, Box<PathFailure>>;

pub(crate) struct Traversal<'a> {
    graph: &'a WorkflowGraph<'a>,
    primitives: &'a PrimitiveAdapter,
    config: &'a EngineConfig,
    cancel: CancellationToken,
}

impl<'a> Traversal<'a> {
    pub(crate) fn new(
        graph: &'a WorkflowGraph<'a>,
        primitives: &'a PrimitiveAdapter,
        config: &'a EngineConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            graph,
            primitives,
            config,
            cancel,
        }
    }

    /// Execute `node_id` and everything reachable from it.
    pub(crate) fn visit<'s>(
        &'s self,
        node_id: &'s str,
        context: ExecutionContext,
        results: &'s ResultCollector,
    ) -> BoxFuture<'s, PathResult> {
        Box::pin(async move {
            let Some(node) = self.graph.node(node_id) else {
                let error = EngineError::NodeNotFound(node_id.to_string());
                return Err(self.fail(node_id, error, context));
            };

            if context.has_executed(node_id) {
                debug!(node_id, "node already executed on this path, skipping");
                return Ok(context);
            }

            let started_at = Utc::now();
            let clock = Instant::now();
            info!(node_id, node_type = ?node.node_type, "executing node");

            let outcome = if self.cancel.is_cancelled() {
                Err(EngineError::Cancelled)
            } else {
                self.execute_node(node, &context, results).await
            };

            match outcome {
                Ok(output) => {
                    results.push(NodeRunResult {
                        node_id: node.id.clone(),
                        node_type: node.node_type,
                        success: true,
                        output: Some(output.clone()),
                        error: None,
                        started_at,
                        duration_ms: clock.elapsed().as_millis() as u64,
                    });

                    let mut context = context.with_node_output(&node.id, output.clone());
                    for edge in self.graph.outgoing(&node.id) {
                        if self.should_follow(node, &output, edge, &context) {
                            context = self.visit(&edge.target, context, results).await?;
                        }
                    }
                    Ok(context)
                }
                Err(e) => {
                    error!(node_id, "node failed: {}", e);
                    results.push(NodeRunResult {
                        node_id: node.id.clone(),
                        node_type: node.node_type,
                        success: false,
                        output: None,
                        error: Some(e.to_string()),
                        started_at,
                        duration_ms: clock.elapsed().as_millis() as u64,
                    });
                    Err(self.fail(node_id, e, context))
                }
            }
        })
    }

    fn fail(&self, node_id: &str, error: EngineError, context: ExecutionContext) -> Box<PathFailure> {
        let context = context.with_error(node_id, error.to_string());
        Box::new(PathFailure {
            node_id: node_id.to_string(),
            error,
            context,
        })
    }

    fn should_follow(
        &self,
        node: &WorkflowNode,
        output: &Value,
        edge: &WorkflowEdge,
        context: &ExecutionContext,
    ) -> bool {
        match (node.node_type, edge.handle()) {
            // Consumed by the node itself.
            (NodeType::Loop, Some(BODY_HANDLE)) | (NodeType::Parallel, _) => return false,
            (NodeType::Condition, Some(handle @ ("true" | "false"))) => {
                if output.as_bool() != Some(handle == "true") {
                    return false;
                }
            }
            _ => {}
        }

        match &edge.condition {
            Some(guard) => evaluate_condition(guard, context),
            None => true,
        }
    }

    async fn execute_node(
        &self,
        node: &WorkflowNode,
        context: &ExecutionContext,
        results: &ResultCollector,
    ) -> Result<Value, EngineError> {
        match node.node_type {
            NodeType::Trigger => Ok(context.trigger().clone()),
            NodeType::Primitive => self.run_primitive(node, context).await,
            NodeType::Condition => {
                let config: ConditionNodeConfig = parse_config(node)?;
                Ok(Value::Bool(evaluate_condition(&config.condition, context)))
            }
            NodeType::Loop => self.run_loop(node, context, results).await,
            NodeType::Delay => self.run_delay(node).await,
            NodeType::Parallel => self.run_parallel(node, context, results).await,
            NodeType::Output => {
                let config: OutputNodeConfig = parse_config(node)?;
                Ok(Value::Object(resolve_input_mapping(&config.mapping, context)))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Per-type executors
    // -----------------------------------------------------------------------

    async fn run_primitive(
        &self,
        node: &WorkflowNode,
        context: &ExecutionContext,
    ) -> Result<Value, EngineError> {
        let config: PrimitiveNodeConfig = parse_config(node)?;
        let reference = match (config.primitive_id, config.primitive) {
            (Some(id), _) => PrimitiveRef::Id(id),
            (None, Some(name)) => PrimitiveRef::Name(name),
            (None, None) => {
                return Err(EngineError::invalid_config(
                    &node.id,
                    "either primitive_id or primitive is required",
                ))
            }
        };

        let mut input = config.config;
        for (key, value) in resolve_input_mapping(&config.input_mapping, context) {
            // An unresolved mapping does not clobber a static default.
            if value.is_null() && input.contains_key(&key) {
                continue;
            }
            input.insert(key, value);
        }

        let call = CallContext {
            execution_id: Some(context.execution_id),
            workflow_id: Some(context.workflow_id),
            node_id: Some(node.id.clone()),
            cancel: Some(self.cancel.clone()),
        };

        self.primitives
            .execute_primitive(&reference, Value::Object(input), &call)
            .await
            .map_err(|source| match source {
                PrimitiveError::Cancelled { .. } => EngineError::Cancelled,
                source => EngineError::Primitive {
                    node_id: node.id.clone(),
                    source,
                },
            })
    }

    async fn run_loop(
        &self,
        node: &WorkflowNode,
        context: &ExecutionContext,
        results: &ResultCollector,
    ) -> Result<Value, EngineError> {
        let config: LoopNodeConfig = parse_config(node)?;

        // A bare name refers to a variable; anything else is a rooted path.
        let collection = match context.variable(&config.collection) {
            Some(value) => Some(value.clone()),
            None => resolve_value(context, &config.collection),
        };
        let items = match collection {
            Some(Value::Array(items)) => items,
            other => {
                return Err(EngineError::LoopType {
                    node_id: node.id.clone(),
                    found: type_name(other.as_ref()),
                })
            }
        };
        if items.len() > self.config.max_loop_iterations {
            return Err(EngineError::invalid_config(
                &node.id,
                format!(
                    "collection has {} items, limit is {}",
                    items.len(),
                    self.config.max_loop_iterations
                ),
            ));
        }

        let body: Vec<&WorkflowEdge> = self
            .graph
            .outgoing(&node.id)
            .iter()
            .copied()
            .filter(|edge| edge.handle() == Some(BODY_HANDLE))
            .collect();

        debug!(node_id = %node.id, items = items.len(), "starting loop");
        let baseline = context.executed_nodes().len();
        let mut outputs = Vec::with_capacity(items.len());

        for (index, item) in items.into_iter().enumerate() {
            let mut iteration = context.with_loop_binding(
                &config.item_variable,
                item.clone(),
                config.index_variable.as_deref(),
                index,
            );

            for edge in &body {
                if let Some(guard) = &edge.condition {
                    if !evaluate_condition(guard, &iteration) {
                        continue;
                    }
                }
                iteration = self
                    .visit(&edge.target, iteration, results)
                    .await
                    .map_err(|failure| EngineError::LoopIteration {
                        node_id: node.id.clone(),
                        index,
                        source: Box::new(failure.error),
                    })?;
            }

            outputs.push(iteration.last_output_since(baseline).cloned().unwrap_or(item));
        }

        Ok(Value::Array(outputs))
    }

    async fn run_delay(&self, node: &WorkflowNode) -> Result<Value, EngineError> {
        let config: DelayNodeConfig = parse_config(node)?;
        let duration = config
            .duration()
            .ok_or_else(|| EngineError::invalid_config(&node.id, "delay must be a non-negative duration"))?;

        debug!(node_id = %node.id, "delaying for {:?}", duration);
        tokio::select! {
            _ = tokio::time::sleep(duration) => {
                Ok(json!({ "delayed": true, "duration": duration.as_millis() as u64 }))
            }
            _ = self.cancel.cancelled() => Err(EngineError::Cancelled),
        }
    }

    async fn run_parallel(
        &self,
        node: &WorkflowNode,
        context: &ExecutionContext,
        results: &ResultCollector,
    ) -> Result<Value, EngineError> {
        let branches: Vec<&WorkflowEdge> = self
            .graph
            .outgoing(&node.id)
            .iter()
            .copied()
            .filter(|edge| {
                if self.graph.node(&edge.target).is_none() {
                    warn!(node_id = %node.id, target = %edge.target, "skipping unresolved branch");
                    return false;
                }
                edge.condition
                    .as_ref()
                    .map_or(true, |guard| evaluate_condition(guard, context))
            })
            .collect();

        let buffers: Vec<ResultCollector> = branches.iter().map(|_| ResultCollector::default()).collect();
        let outcomes = join_all(
            branches
                .iter()
                .zip(&buffers)
                .map(|(edge, buffer)| self.visit(&edge.target, context.clone(), buffer)),
        )
        .await;

        for buffer in &buffers {
            results.extend(buffer.take());
        }

        let baseline = context.executed_nodes().len();
        let mut outputs = Vec::with_capacity(branches.len());
        let mut first_failure = None;

        for (edge, outcome) in branches.iter().zip(outcomes) {
            match outcome {
                Ok(branch) => outputs.push(branch.last_output_since(baseline).cloned().unwrap_or(Value::Null)),
                Err(failure) => {
                    if first_failure.is_none() {
                        first_failure = Some((edge.target.clone(), failure.error));
                    }
                }
            }
        }

        match first_failure {
            Some((branch, source)) => Err(EngineError::ParallelBranch {
                node_id: node.id.clone(),
                branch,
                source: Box::new(source),
            }),
            None => Ok(Value::Array(outputs)),
        }
    }
}
