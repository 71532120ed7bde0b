//! Workflow lifecycle.
//!
//! `WorkflowEngine` is the central orchestrator:
//! 1. Loads and validates the workflow definition.
//! 2. Creates a `RUNNING` execution row.
//! 3. Walks the graph from the trigger node (see [`crate::executor`]).
//! 4. Moves the row to exactly one terminal state and returns an
//!    [`ExecutionOutcome`].
//!
//! Node failures end up in the outcome, not in `Err`; only unknown or
//! disabled workflows, trigger mismatches and storage failures are errors.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn, Instrument};
use uuid::Uuid;

use db::models::{ExecutionFinish, ExecutionStatus, NewExecution, WorkflowExecutionRow};
use db::WorkflowStore;
use primitives::PrimitiveAdapter;

use crate::config::EngineConfig;
use crate::context::{ContextError, ExecutionContext};
use crate::dag::validate_definition;
use crate::executor::{NodeRunResult, PathFailure, ResultCollector, Traversal, WorkflowGraph};
use crate::models::{NodeType, Trigger, TriggerKind, WorkflowDefinition};
use crate::scheduler::should_run_scheduled_workflow;
use crate::EngineError;

// ---------------------------------------------------------------------------
// Requests and outcomes
// ---------------------------------------------------------------------------

/// Who or what started a run, and with which payload.
#[derive(Debug, Clone)]
pub struct TriggerRequest {
    pub triggered_by: TriggerKind,
    pub user_id: Option<String>,
    pub agent_id: Option<String>,
    /// Becomes the trigger node's output and the `trigger` / `event` roots.
    pub event_data: Value,
    /// Overrides for the workflow's default variables.
    pub variables: Option<Map<String, Value>>,
}

impl TriggerRequest {
    pub fn new(triggered_by: TriggerKind, event_data: Value) -> Self {
        Self {
            triggered_by,
            user_id: None,
            agent_id: None,
            event_data,
            variables: None,
        }
    }

    pub fn manual(event_data: Value) -> Self {
        Self::new(TriggerKind::Manual, event_data)
    }

    pub fn webhook(payload: Value) -> Self {
        Self::new(TriggerKind::Webhook, payload)
    }

    pub fn event(payload: Value) -> Self {
        Self::new(TriggerKind::Event, payload)
    }

    pub fn schedule(at: DateTime<Utc>) -> Self {
        Self::new(TriggerKind::Schedule, json!({ "scheduled_at": at.to_rfc3339() }))
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_variables(mut self, variables: Map<String, Value>) -> Self {
        self.variables = Some(variables);
        self
    }
}

/// The result of running a full workflow.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionOutcome {
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub node_results: Vec<NodeRunResult>,
    pub errors: Vec<ContextError>,
}

impl ExecutionOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// Runs workflows against a [`WorkflowStore`] and a [`PrimitiveAdapter`].
///
/// Construct one engine per process and share it behind an `Arc`.
pub struct WorkflowEngine {
    store: Arc<dyn WorkflowStore>,
    primitives: Arc<PrimitiveAdapter>,
    config: EngineConfig,
    in_flight: InFlightMap,
}

impl WorkflowEngine {
    pub fn new(store: Arc<dyn WorkflowStore>, primitives: Arc<PrimitiveAdapter>, config: EngineConfig) -> Self {
        Self {
            store,
            primitives,
            config,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn primitives(&self) -> &PrimitiveAdapter {
        &self.primitives
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Executions currently running in this process.
    pub fn in_flight(&self) -> Vec<Uuid> {
        self.in_flight.lock().keys().copied().collect()
    }

    // -----------------------------------------------------------------------
    // Entry points
    // -----------------------------------------------------------------------

    /// Load workflow `workflow_id` and run it.
    ///
    /// # Errors
    /// `WorkflowNotFound`, `WorkflowDisabled`, `InvalidDefinition` and
    /// `Database`.  Node failures are reported through the outcome.
    #[instrument(skip(self, request), fields(triggered_by = %request.triggered_by))]
    pub async fn execute_workflow(
        &self,
        workflow_id: Uuid,
        request: TriggerRequest,
    ) -> Result<ExecutionOutcome, EngineError> {
        let row = self
            .store
            .find_workflow(workflow_id)
            .await?
            .ok_or_else(|| EngineError::WorkflowNotFound(workflow_id.to_string()))?;
        let workflow = WorkflowDefinition::from_row(row)?;

        if !workflow.enabled {
            return Err(EngineError::WorkflowDisabled(workflow.id));
        }
        self.run(&workflow, request).await
    }

    pub async fn execute_manual(
        &self,
        workflow_id: Uuid,
        user_id: Option<String>,
        variables: Option<Map<String, Value>>,
    ) -> Result<ExecutionOutcome, EngineError> {
        let mut request = TriggerRequest::manual(json!({}));
        request.user_id = user_id;
        request.variables = variables;
        self.execute_workflow(workflow_id, request).await
    }

    /// Run the webhook-triggered workflow registered under `slug`.
    #[instrument(skip(self, payload))]
    pub async fn execute_webhook(&self, slug: &str, payload: Value) -> Result<ExecutionOutcome, EngineError> {
        let row = self
            .store
            .find_workflow_by_slug(slug)
            .await?
            .ok_or_else(|| EngineError::WorkflowNotFound(slug.to_string()))?;
        let workflow = WorkflowDefinition::from_row(row)?;

        if workflow.trigger != Trigger::Webhook {
            return Err(EngineError::TriggerMismatch {
                workflow: workflow.slug.clone(),
                expected: TriggerKind::Webhook.as_str(),
                actual: workflow.trigger.kind().as_str(),
            });
        }
        if !workflow.enabled {
            return Err(EngineError::WorkflowDisabled(workflow.id));
        }
        self.run(&workflow, TriggerRequest::webhook(payload)).await
    }

    /// Run every enabled workflow subscribed to `event`, one after another.
    #[instrument(skip(self, payload))]
    pub async fn dispatch_event(&self, event: &str, payload: Value) -> Result<Vec<ExecutionOutcome>, EngineError> {
        let rows = self
            .store
            .list_enabled_by_trigger(TriggerKind::Event.as_str())
            .await?;

        let mut outcomes = Vec::new();
        for row in rows {
            let workflow = match WorkflowDefinition::from_row(row) {
                Ok(w) => w,
                Err(e) => {
                    warn!("skipping unreadable workflow: {}", e);
                    continue;
                }
            };
            if !matches!(&workflow.trigger, Trigger::Event { event: e } if e == event) {
                continue;
            }
            outcomes.push(self.run(&workflow, TriggerRequest::event(payload.clone())).await?);
        }

        info!("event '{}' started {} workflow(s)", event, outcomes.len());
        Ok(outcomes)
    }

    /// Run every enabled scheduled workflow whose cron matches `now`.
    /// Meant to be called once a minute by an external poller.
    #[instrument(skip(self))]
    pub async fn run_due_schedules(&self, now: DateTime<Utc>) -> Result<Vec<ExecutionOutcome>, EngineError> {
        let rows = self
            .store
            .list_enabled_by_trigger(TriggerKind::Schedule.as_str())
            .await?;

        let mut outcomes = Vec::new();
        for row in rows {
            let workflow = match WorkflowDefinition::from_row(row) {
                Ok(w) => w,
                Err(e) => {
                    warn!("skipping unreadable workflow: {}", e);
                    continue;
                }
            };
            if should_run_scheduled_workflow(&workflow, &now) {
                outcomes.push(self.run(&workflow, TriggerRequest::schedule(now)).await?);
            }
        }
        Ok(outcomes)
    }

    /// Move a running execution to `CANCELLED` and signal its run to stop.
    ///
    /// Returns `false` when the execution had already finished.
    #[instrument(skip(self))]
    pub async fn cancel_execution(&self, execution_id: Uuid) -> Result<bool, EngineError> {
        let applied = self
            .store
            .finish_execution(
                execution_id,
                ExecutionFinish {
                    status: ExecutionStatus::Cancelled,
                    result: None,
                    error: Some("cancelled by request".to_string()),
                },
            )
            .await?;

        if let Some(token) = self.in_flight.lock().get(&execution_id) {
            token.cancel();
        }
        info!(applied, "cancel requested for execution {}", execution_id);
        Ok(applied)
    }

    pub async fn get_execution(&self, execution_id: Uuid) -> Result<Option<WorkflowExecutionRow>, EngineError> {
        Ok(self.store.get_execution(execution_id).await?)
    }

    // -----------------------------------------------------------------------
    // Run
    // -----------------------------------------------------------------------

    /// Run an already-loaded definition.
    ///
    /// The traversal runs on its own task, so the execution row reaches a
    /// terminal state even if the caller stops waiting for the outcome.
    #[instrument(skip(self, workflow, request), fields(workflow_id = %workflow.id))]
    pub async fn run(
        &self,
        workflow: &WorkflowDefinition,
        request: TriggerRequest,
    ) -> Result<ExecutionOutcome, EngineError> {
        let execution = self
            .store
            .create_execution(NewExecution {
                workflow_id: workflow.id,
                triggered_by: request.triggered_by.as_str().to_string(),
                user_id: request.user_id.clone(),
                agent_id: request.agent_id.clone(),
                trigger_data: request.event_data.clone(),
            })
            .await?;
        let execution_id = execution.id;
        info!("execution {} started", execution_id);

        let mut variables = workflow.variables.clone();
        if let Some(overrides) = request.variables {
            variables.extend(overrides);
        }
        let context = ExecutionContext::new(execution_id, workflow.id, request.event_data, variables)
            .with_started_at(execution.started_at);

        let cancel = CancellationToken::new();
        let registration = InFlight::register(&self.in_flight, execution_id, cancel.clone());

        let run = ExecutionRun {
            store: self.store.clone(),
            primitives: self.primitives.clone(),
            config: self.config.clone(),
            workflow: workflow.clone(),
            cancel,
            _registration: registration,
        };
        match tokio::spawn(run.execute(context).in_current_span()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let message = e.to_string();
                error!("execution {} aborted: {}", execution_id, message);
                self.store
                    .finish_execution(
                        execution_id,
                        ExecutionFinish {
                            status: ExecutionStatus::Failed,
                            result: None,
                            error: Some(message.clone()),
                        },
                    )
                    .await?;
                Err(EngineError::RunAborted { execution_id, message })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// One run
// ---------------------------------------------------------------------------

type InFlightMap = Arc<Mutex<HashMap<Uuid, CancellationToken>>>;

/// Keeps an execution's token in the in-flight map while its run is alive.
struct InFlight {
    map: InFlightMap,
    execution_id: Uuid,
}

impl InFlight {
    fn register(map: &InFlightMap, execution_id: Uuid, token: CancellationToken) -> Self {
        map.lock().insert(execution_id, token);
        Self {
            map: map.clone(),
            execution_id,
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.map.lock().remove(&self.execution_id);
    }
}

/// Everything a spawned run needs, owned.
struct ExecutionRun {
    store: Arc<dyn WorkflowStore>,
    primitives: Arc<PrimitiveAdapter>,
    config: EngineConfig,
    workflow: WorkflowDefinition,
    cancel: CancellationToken,
    _registration: InFlight,
}

impl ExecutionRun {
    async fn execute(self, context: ExecutionContext) -> Result<ExecutionOutcome, EngineError> {
        let execution_id = context.execution_id;
        let workflow = &self.workflow;
        let clock = Instant::now();

        // A cancel that landed before the token was registered only moved the row.
        if let Some(row) = self.store.get_execution(execution_id).await? {
            let persisted = row.status()?;
            if persisted.is_terminal() {
                info!("execution {} was {} before it started", execution_id, persisted);
                return Ok(ExecutionOutcome {
                    execution_id,
                    workflow_id: workflow.id,
                    status: persisted,
                    started_at: context.started_at,
                    finished_at: Utc::now(),
                    duration_ms: clock.elapsed().as_millis() as u64,
                    result: None,
                    error: row.error,
                    node_results: Vec::new(),
                    errors: Vec::new(),
                });
            }
        }

        let results = ResultCollector::default();
        let traversal = self.traverse(context, &results).await;

        let (status, result, error, context) = match traversal {
            Ok(context) => (
                ExecutionStatus::Completed,
                Some(run_result(&results, &context)),
                None,
                context,
            ),
            Err(failure) => {
                let status = if self.cancel.is_cancelled() || failure.error.is_cancellation() {
                    ExecutionStatus::Cancelled
                } else {
                    ExecutionStatus::Failed
                };
                error!(node_id = %failure.node_id, "execution {} {}: {}", execution_id, status, failure.error);
                (status, None, Some(failure.error.to_string()), failure.context)
            }
        };

        let applied = self
            .store
            .finish_execution(
                execution_id,
                ExecutionFinish {
                    status,
                    result: result.clone(),
                    error: error.clone(),
                },
            )
            .await?;

        // Someone else (a cancel request) finished the row first; report
        // what was persisted.
        let status = if applied {
            status
        } else {
            match self.store.get_execution(execution_id).await? {
                Some(row) => row.status()?,
                None => status,
            }
        };

        if applied && status == ExecutionStatus::Completed {
            if let Err(e) = self.store.touch_last_run(workflow.id, Utc::now()).await {
                warn!("could not stamp last run of workflow {}: {}", workflow.id, e);
            }
        }

        info!("execution {} finished as {} in {:?}", execution_id, status, clock.elapsed());

        Ok(ExecutionOutcome {
            execution_id,
            workflow_id: workflow.id,
            status,
            started_at: context.started_at,
            finished_at: Utc::now(),
            duration_ms: clock.elapsed().as_millis() as u64,
            result: if status == ExecutionStatus::Completed { result } else { None },
            error: if status == ExecutionStatus::Completed { None } else { error },
            node_results: results.take(),
            errors: context.errors().to_vec(),
        })
    }

    async fn traverse(
        &self,
        context: ExecutionContext,
        results: &ResultCollector,
    ) -> Result<ExecutionContext, Box<PathFailure>> {
        let workflow = &self.workflow;
        let trigger_id = match validate_definition(workflow) {
            Ok(_) => workflow
                .nodes
                .iter()
                .find(|n| n.node_type == NodeType::Trigger)
                .map(|n| n.id.as_str()),
            Err(e) => {
                return Err(Box::new(PathFailure {
                    node_id: String::new(),
                    context: context.with_error("", e.to_string()),
                    error: e,
                }))
            }
        };
        let Some(trigger_id) = trigger_id else {
            return Err(Box::new(PathFailure {
                node_id: String::new(),
                context: context.clone(),
                error: EngineError::MissingTrigger,
            }));
        };

        let graph = WorkflowGraph::new(workflow);
        let traversal = Traversal::new(&graph, &self.primitives, &self.config, self.cancel.clone());
        traversal.visit(trigger_id, context, results).await
    }
}

/// Output of the last `output` node that ran anywhere in the run, including
/// loop bodies and parallel branches; else every root-level node output.
fn run_result(results: &ResultCollector, context: &ExecutionContext) -> Value {
    results
        .last_output_of(NodeType::Output)
        .unwrap_or_else(|| Value::Object(context.node_outputs().clone()))
}
