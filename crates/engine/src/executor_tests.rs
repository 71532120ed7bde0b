//! End-to-end tests for the workflow engine.
//!
//! These run real definitions through `WorkflowEngine` against the in-memory
//! store and `MockHandler` primitives, so no Postgres connection is required.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use db::models::{ExecutionFinish, ExecutionStatus, NewExecution, PrimitiveRow, WorkflowExecutionRow, WorkflowRow};
use db::{DbError, MemoryStore, WorkflowStore};
use primitives::mock::MockHandler;
use primitives::{AdapterConfig, HandlerRegistry, PrimitiveAdapter};

use crate::condition::{Condition, Operator};
use crate::context::ExecutionContext;
use crate::executor::{ResultCollector, Traversal, WorkflowGraph};
use crate::models::{NodeType, Trigger, WorkflowDefinition, WorkflowEdge, WorkflowNode};
use crate::{EngineConfig, EngineError, TriggerRequest, WorkflowEngine};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

struct Harness {
    store: Arc<MemoryStore>,
    engine: Arc<WorkflowEngine>,
}

impl Harness {
    fn new(primitives: Vec<(&str, MockHandler, Value)>) -> Self {
        let store = Arc::new(MemoryStore::new());
        let mut registry = HandlerRegistry::new();
        for (name, handler, schema) in primitives {
            store.put_primitive(PrimitiveRow {
                id: Uuid::new_v4(),
                name: name.to_string(),
                category: "test".to_string(),
                input_schema: schema,
                timeout_ms: 5_000,
                enabled: true,
                version: "1".to_string(),
                created_at: Utc::now(),
            });
            registry.register(name, "*", Arc::new(handler));
        }

        let adapter = PrimitiveAdapter::new(store.clone(), registry, AdapterConfig::default());
        let engine = WorkflowEngine::new(store.clone(), Arc::new(adapter), EngineConfig::default());
        Self {
            store,
            engine: Arc::new(engine),
        }
    }

    fn install(&self, workflow: &WorkflowDefinition) {
        self.store.put_workflow(workflow.to_row().unwrap());
    }
}

fn node(id: &str, node_type: NodeType, config: Value) -> WorkflowNode {
    WorkflowNode::new(id, node_type, config)
}

fn trigger() -> WorkflowNode {
    node("start", NodeType::Trigger, Value::Null)
}

fn primitive(id: &str, name: &str, mapping: Value) -> WorkflowNode {
    node(id, NodeType::Primitive, json!({ "primitive": name, "input_mapping": mapping }))
}

fn output(id: &str, mapping: Value) -> WorkflowNode {
    node(id, NodeType::Output, json!({ "mapping": mapping }))
}

fn reference(path: &str) -> Value {
    json!({ "type": "reference", "path": path })
}

fn edge(source: &str, target: &str) -> WorkflowEdge {
    WorkflowEdge::new(source, target)
}

fn manual(name: &str, nodes: Vec<WorkflowNode>, edges: Vec<WorkflowEdge>) -> WorkflowDefinition {
    WorkflowDefinition::new(name, Trigger::Manual, nodes, edges)
}

fn executed_ids(outcome: &crate::ExecutionOutcome) -> Vec<String> {
    outcome.node_results.iter().map(|r| r.node_id.clone()).collect()
}

// ============================================================
// Linear flows and templates
// ============================================================

#[tokio::test]
async fn trigger_email_is_templated_into_primitive_input() {
    let send = MockHandler::returning(json!({ "sent": true }));
    let h = Harness::new(vec![(
        "send_email",
        send.clone(),
        json!({ "to": { "type": "string", "required": true } }),
    )]);

    let wf = manual(
        "welcome",
        vec![
            trigger(),
            primitive("send", "send_email", json!({ "to": "{{trigger.email}}" })),
            output("done", json!({ "sent": reference("nodes.send.sent") })),
        ],
        vec![edge("start", "send"), edge("send", "done")],
    );
    h.install(&wf);

    let outcome = h
        .engine
        .execute_workflow(wf.id, TriggerRequest::manual(json!({ "email": "a@b.com" })))
        .await
        .unwrap();

    assert_eq!(outcome.status, ExecutionStatus::Completed);
    assert_eq!(outcome.result, Some(json!({ "sent": true })));
    assert_eq!(send.calls(), vec![json!({ "to": "a@b.com" })]);
    assert_eq!(executed_ids(&outcome), vec!["start", "send", "done"]);

    let rows = h.store.executions();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, "COMPLETED");
    assert_eq!(rows[0].triggered_by, "manual");
    assert!(h.store.workflow(wf.id).unwrap().last_run_at.is_some());
    assert_eq!(h.store.primitive_executions().len(), 1);
}

#[tokio::test]
async fn static_config_is_overridden_by_mapping() {
    let echo = MockHandler::echo();
    let h = Harness::new(vec![("notify", echo.clone(), json!({}))]);

    let mut notify = primitive("notify", "notify", json!({ "channel": "{{trigger.channel}}", "missing": reference("trigger.nope") }));
    notify.config["config"] = json!({ "channel": "email", "missing": "kept", "priority": "low" });

    let wf = manual("n", vec![trigger(), notify], vec![edge("start", "notify")]);
    h.install(&wf);

    let outcome = h
        .engine
        .execute_workflow(wf.id, TriggerRequest::manual(json!({ "channel": "sms" })))
        .await
        .unwrap();

    assert!(outcome.succeeded());
    assert_eq!(
        echo.calls(),
        vec![json!({ "channel": "sms", "missing": "kept", "priority": "low" })]
    );
    // No output node: the result is every node output.
    assert_eq!(outcome.result.unwrap()["notify"]["channel"], json!("sms"));
}

#[tokio::test]
async fn request_variables_override_defaults() {
    let h = Harness::new(vec![]);
    let mut defaults = Map::new();
    defaults.insert("greeting".into(), json!("hello"));
    defaults.insert("name".into(), json!("world"));

    let wf = manual(
        "vars",
        vec![
            trigger(),
            output("out", json!({ "text": "{{variables.greeting}} {{variables.name}}" })),
        ],
        vec![edge("start", "out")],
    )
    .with_variables(defaults);
    h.install(&wf);

    let mut overrides = Map::new();
    overrides.insert("name".into(), json!("Ada"));
    let outcome = h
        .engine
        .execute_manual(wf.id, Some("user-1".into()), Some(overrides))
        .await
        .unwrap();

    assert_eq!(outcome.result, Some(json!({ "text": "hello Ada" })));
    assert_eq!(h.store.executions()[0].user_id.as_deref(), Some("user-1"));
}

// ============================================================
// Conditions and guards
// ============================================================

#[tokio::test]
async fn condition_handles_route_by_boolean_output() {
    let alert = MockHandler::returning(json!("alerted"));
    let thank = MockHandler::returning(json!("thanked"));
    let h = Harness::new(vec![
        ("alert_team", alert.clone(), json!({})),
        ("thank_customer", thank.clone(), json!({})),
    ]);

    let wf = manual(
        "review triage",
        vec![
            trigger(),
            node(
                "low_rating",
                NodeType::Condition,
                json!({ "condition": { "type": "simple", "field": "trigger.rating", "operator": "lte", "value": 2 } }),
            ),
            primitive("alert", "alert_team", json!({})),
            primitive("thank", "thank_customer", json!({})),
        ],
        vec![
            edge("start", "low_rating"),
            edge("low_rating", "alert").with_handle("true"),
            edge("low_rating", "thank").with_handle("false"),
        ],
    );
    h.install(&wf);

    let low = h
        .engine
        .execute_workflow(wf.id, TriggerRequest::manual(json!({ "rating": 1 })))
        .await
        .unwrap();
    assert!(low.succeeded());
    assert_eq!(executed_ids(&low), vec!["start", "low_rating", "alert"]);

    let high = h
        .engine
        .execute_workflow(wf.id, TriggerRequest::manual(json!({ "rating": 5 })))
        .await
        .unwrap();
    assert_eq!(executed_ids(&high), vec!["start", "low_rating", "thank"]);

    assert_eq!(alert.call_count(), 1);
    assert_eq!(thank.call_count(), 1);
}

#[tokio::test]
async fn guarded_edges_are_skipped_when_false() {
    let vip = MockHandler::returning(json!("vip"));
    let h = Harness::new(vec![("vip_offer", vip.clone(), json!({}))]);

    let big_spender = Condition::All {
        conditions: vec![
            Condition::simple("trigger.total", Operator::Gte, json!(100)),
            Condition::simple("trigger.country", Operator::In, json!(["DE", "FR"])),
        ],
    };
    let wf = manual(
        "vip",
        vec![trigger(), primitive("offer", "vip_offer", json!({}))],
        vec![edge("start", "offer").with_condition(big_spender)],
    );
    h.install(&wf);

    let skipped = h
        .engine
        .execute_workflow(wf.id, TriggerRequest::manual(json!({ "total": 150, "country": "US" })))
        .await
        .unwrap();
    assert!(skipped.succeeded());
    assert_eq!(executed_ids(&skipped), vec!["start"]);

    h.engine
        .execute_workflow(wf.id, TriggerRequest::manual(json!({ "total": 150, "country": "DE" })))
        .await
        .unwrap();
    assert_eq!(vip.call_count(), 1);
}

// ============================================================
// Loops
// ============================================================

#[tokio::test]
async fn loop_runs_body_in_order_and_does_not_leak() {
    let tag = MockHandler::echo();
    let h = Harness::new(vec![("tag_product", tag.clone(), json!({}))]);

    let mut vars = Map::new();
    vars.insert("products".into(), json!(["a", "b", "c"]));

    let wf = manual(
        "tag all",
        vec![
            trigger(),
            node(
                "each",
                NodeType::Loop,
                json!({ "collection": "products", "item_variable": "product", "index_variable": "i" }),
            ),
            primitive("tag", "tag_product", json!({ "sku": "{{variables.product}}", "idx": reference("variables.i") })),
            output(
                "out",
                json!({
                    "tagged": reference("nodes.each"),
                    "leaked_item": reference("variables.product"),
                    "leaked_body": reference("nodes.tag")
                }),
            ),
        ],
        vec![
            edge("start", "each"),
            edge("each", "tag").with_handle("body"),
            edge("each", "out"),
        ],
    )
    .with_variables(vars);
    h.install(&wf);

    let outcome = h
        .engine
        .execute_workflow(wf.id, TriggerRequest::manual(json!({})))
        .await
        .unwrap();

    assert!(outcome.succeeded(), "{:?}", outcome.error);
    let result = outcome.result.clone().unwrap();
    assert_eq!(
        result["tagged"],
        json!([
            { "sku": "a", "idx": 0 },
            { "sku": "b", "idx": 1 },
            { "sku": "c", "idx": 2 }
        ])
    );
    assert_eq!(result["leaked_item"], Value::Null);
    assert_eq!(result["leaked_body"], Value::Null);
    assert_eq!(tag.call_count(), 3);
    assert_eq!(
        executed_ids(&outcome),
        vec!["start", "tag", "tag", "tag", "each", "out"]
    );
}

#[tokio::test]
async fn loop_without_body_yields_items() {
    let h = Harness::new(vec![]);
    let wf = manual(
        "identity",
        vec![
            trigger(),
            node("each", NodeType::Loop, json!({ "collection": "trigger.items" })),
            output("out", json!({ "items": reference("nodes.each") })),
        ],
        vec![edge("start", "each"), edge("each", "out")],
    );
    h.install(&wf);

    let outcome = h
        .engine
        .execute_workflow(wf.id, TriggerRequest::manual(json!({ "items": [1, 2] })))
        .await
        .unwrap();
    assert_eq!(outcome.result, Some(json!({ "items": [1, 2] })));
}

#[tokio::test]
async fn loop_over_non_list_fails() {
    let h = Harness::new(vec![]);
    let wf = manual(
        "bad loop",
        vec![trigger(), node("each", NodeType::Loop, json!({ "collection": "trigger.items" }))],
        vec![edge("start", "each")],
    );
    h.install(&wf);

    let outcome = h
        .engine
        .execute_workflow(wf.id, TriggerRequest::manual(json!({ "items": "nope" })))
        .await
        .unwrap();

    assert_eq!(outcome.status, ExecutionStatus::Failed);
    assert!(outcome.error.as_deref().unwrap().contains("expected a list, found string"));
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].node_id, "each");
    let last = outcome.node_results.last().unwrap();
    assert_eq!(last.node_id, "each");
    assert!(!last.success);
    assert_eq!(h.store.executions()[0].status, "FAILED");
}

// ============================================================
// Parallel
// ============================================================

#[tokio::test(start_paused = true)]
async fn parallel_outputs_follow_edge_order() {
    let h = Harness::new(vec![
        ("slow", MockHandler::sleeping(Duration::from_millis(200), json!("slow")), json!({})),
        ("fast", MockHandler::returning(json!("fast")), json!({})),
    ]);

    let wf = manual(
        "fan out",
        vec![
            trigger(),
            node("fan", NodeType::Parallel, Value::Null),
            primitive("a", "slow", json!({})),
            primitive("b", "fast", json!({})),
            output("out", json!({ "branches": reference("nodes.fan") })),
        ],
        vec![
            edge("start", "fan"),
            edge("fan", "a"),
            edge("fan", "b"),
            edge("a", "out"),
        ],
    );
    h.install(&wf);

    let outcome = h
        .engine
        .execute_workflow(wf.id, TriggerRequest::manual(json!({})))
        .await
        .unwrap();

    assert!(outcome.succeeded(), "{:?}", outcome.error);
    // Branch `a` continues into `out`, so its branch output is `out`'s.
    // `out` ran in the branch's context, where `fan` has no output yet.
    assert_eq!(outcome.result, Some(json!({ "branches": null })));
    // Branch results are merged in edge order, then the parallel node itself.
    assert_eq!(executed_ids(&outcome), vec!["start", "a", "out", "b", "fan"]);
}

#[tokio::test(start_paused = true)]
async fn parallel_branches_wait_concurrently() {
    let h = Harness::new(vec![]);
    let wf = manual(
        "two waits",
        vec![
            trigger(),
            node("fan", NodeType::Parallel, Value::Null),
            node("left", NodeType::Delay, json!({ "seconds": 1 })),
            node("right", NodeType::Delay, json!({ "seconds": 1 })),
            output("out", json!({ "both": reference("nodes.fan") })),
        ],
        vec![
            edge("start", "fan"),
            edge("fan", "left"),
            edge("fan", "right"),
            edge("fan", "out"),
        ],
    );
    h.install(&wf);

    let before = tokio::time::Instant::now();
    let outcome = h
        .engine
        .execute_workflow(wf.id, TriggerRequest::manual(json!({})))
        .await
        .unwrap();
    let elapsed = before.elapsed();

    assert!(outcome.succeeded(), "{:?}", outcome.error);
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_secs(2), "branches ran one after another: {elapsed:?}");
}

#[tokio::test]
async fn output_inside_a_loop_body_is_the_run_result() {
    let h = Harness::new(vec![]);
    let wf = manual(
        "last receipt",
        vec![
            trigger(),
            node("each", NodeType::Loop, json!({ "collection": "trigger.orders" })),
            output("receipt", json!({ "order": reference("variables.item") })),
        ],
        vec![edge("start", "each"), edge("each", "receipt").with_handle("body")],
    );
    h.install(&wf);

    let outcome = h
        .engine
        .execute_workflow(wf.id, TriggerRequest::manual(json!({ "orders": [7, 8] })))
        .await
        .unwrap();

    assert!(outcome.succeeded(), "{:?}", outcome.error);
    assert_eq!(outcome.result, Some(json!({ "order": 8 })));
}

#[tokio::test]
async fn parallel_with_one_failing_branch_fails_deterministically() {
    let ok = MockHandler::returning(json!("ok"));
    let h = Harness::new(vec![
        ("sync_inventory", ok.clone(), json!({})),
        ("charge_card", MockHandler::failing("card declined"), json!({})),
    ]);

    let wf = manual(
        "checkout",
        vec![
            trigger(),
            node("fan", NodeType::Parallel, Value::Null),
            primitive("inventory", "sync_inventory", json!({})),
            primitive("charge", "charge_card", json!({})),
        ],
        vec![edge("start", "fan"), edge("fan", "inventory"), edge("fan", "charge")],
    );
    h.install(&wf);

    let mut errors = Vec::new();
    for _ in 0..2 {
        let outcome = h
            .engine
            .execute_workflow(wf.id, TriggerRequest::manual(json!({})))
            .await
            .unwrap();

        assert_eq!(outcome.status, ExecutionStatus::Failed);
        let by_id = |id: &str| outcome.node_results.iter().find(|r| r.node_id == id).unwrap().clone();
        assert!(by_id("inventory").success);
        assert!(!by_id("charge").success);
        assert!(!by_id("fan").success);
        errors.push(outcome.error.unwrap());
    }

    assert_eq!(errors[0], errors[1]);
    assert!(errors[0].contains("branch 'charge'"));
    assert!(errors[0].contains("card declined"));
    assert_eq!(ok.call_count(), 2);
}

// ============================================================
// Traversal invariants
// ============================================================

#[tokio::test]
async fn diamond_join_runs_once() {
    let join = MockHandler::returning(json!("joined"));
    let h = Harness::new(vec![
        ("noop", MockHandler::returning(json!(null)), json!({})),
        ("join", join.clone(), json!({})),
    ]);

    let wf = manual(
        "diamond",
        vec![
            trigger(),
            primitive("left", "noop", json!({})),
            primitive("right", "noop", json!({})),
            primitive("join", "join", json!({})),
        ],
        vec![
            edge("start", "left"),
            edge("start", "right"),
            edge("left", "join"),
            edge("right", "join"),
        ],
    );
    h.install(&wf);

    let outcome = h
        .engine
        .execute_workflow(wf.id, TriggerRequest::manual(json!({})))
        .await
        .unwrap();

    assert!(outcome.succeeded());
    assert_eq!(join.call_count(), 1);
    let ids = executed_ids(&outcome);
    let unique: HashSet<&String> = ids.iter().collect();
    assert_eq!(unique.len(), ids.len());
    assert_eq!(ids, vec!["start", "left", "join", "right"]);
}

#[tokio::test]
async fn invalid_input_fails_node_without_reaching_handler() {
    let send = MockHandler::returning(json!({ "sent": true }));
    let h = Harness::new(vec![(
        "send_email",
        send.clone(),
        json!({ "to": { "type": "string", "required": true } }),
    )]);

    let wf = manual(
        "no address",
        vec![trigger(), primitive("send", "send_email", json!({ "to": reference("trigger.email") }))],
        vec![edge("start", "send")],
    );
    h.install(&wf);

    let outcome = h
        .engine
        .execute_workflow(wf.id, TriggerRequest::manual(json!({})))
        .await
        .unwrap();

    assert_eq!(outcome.status, ExecutionStatus::Failed);
    assert!(outcome.error.unwrap().contains("to"));
    assert_eq!(send.call_count(), 0);
    assert!(h.store.primitive_executions().is_empty());
    assert!(h.store.workflow(wf.id).unwrap().last_run_at.is_none());
}

#[tokio::test]
async fn invalid_definition_is_recorded_as_failed_run() {
    let h = Harness::new(vec![]);
    let wf = manual(
        "two entry points",
        vec![trigger(), node("again", NodeType::Trigger, Value::Null)],
        vec![],
    );
    h.install(&wf);

    let outcome = h
        .engine
        .execute_workflow(wf.id, TriggerRequest::manual(json!({})))
        .await
        .unwrap();

    assert_eq!(outcome.status, ExecutionStatus::Failed);
    assert!(outcome.node_results.is_empty());
    assert_eq!(h.store.executions()[0].status, "FAILED");
}

// ============================================================
// Delay and cancellation
// ============================================================

#[tokio::test(start_paused = true)]
async fn delay_suspends_the_path() {
    let h = Harness::new(vec![]);
    let wf = manual(
        "follow up",
        vec![
            trigger(),
            node("wait", NodeType::Delay, json!({ "minutes": 5 })),
            output("out", json!({ "waited": reference("nodes.wait") })),
        ],
        vec![edge("start", "wait"), edge("wait", "out")],
    );
    h.install(&wf);

    let before = tokio::time::Instant::now();
    let outcome = h
        .engine
        .execute_workflow(wf.id, TriggerRequest::manual(json!({})))
        .await
        .unwrap();

    assert!(before.elapsed() >= Duration::from_secs(300));
    assert_eq!(
        outcome.result,
        Some(json!({ "waited": { "delayed": true, "duration": 300_000 } }))
    );
}

#[tokio::test(start_paused = true)]
async fn cancel_stops_a_delayed_run() {
    let h = Harness::new(vec![]);
    let wf = manual(
        "long wait",
        vec![
            trigger(),
            node("wait", NodeType::Delay, json!({ "hours": 1 })),
            output("out", json!({})),
        ],
        vec![edge("start", "wait"), edge("wait", "out")],
    );
    h.install(&wf);

    let engine = h.engine.clone();
    let id = wf.id;
    let run = tokio::spawn(async move {
        engine.execute_workflow(id, TriggerRequest::manual(json!({}))).await
    });

    let execution_id = loop {
        if let Some(row) = h.store.executions().first() {
            break row.id;
        }
        tokio::task::yield_now().await;
    };

    assert!(h.engine.cancel_execution(execution_id).await.unwrap());
    let outcome = run.await.unwrap().unwrap();

    assert_eq!(outcome.status, ExecutionStatus::Cancelled);
    assert!(!executed_ids(&outcome).contains(&"out".to_string()));
    assert_eq!(h.store.executions()[0].status, "CANCELLED");
    assert!(!h.engine.cancel_execution(execution_id).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn abandoned_caller_still_finishes_the_execution() {
    let h = Harness::new(vec![]);
    let wf = manual(
        "nightly digest",
        vec![
            trigger(),
            node("wait", NodeType::Delay, json!({ "hours": 1 })),
            output("out", json!({ "sent": true })),
        ],
        vec![edge("start", "wait"), edge("wait", "out")],
    );
    h.install(&wf);

    let gave_up = tokio::time::timeout(
        Duration::from_secs(5),
        h.engine.execute_workflow(wf.id, TriggerRequest::manual(json!({}))),
    )
    .await;
    assert!(gave_up.is_err());
    assert_eq!(h.store.executions()[0].status, "RUNNING");
    assert_eq!(h.engine.in_flight().len(), 1);

    tokio::time::sleep(Duration::from_secs(2 * 3600)).await;
    for _ in 0..10 {
        if h.store.executions()[0].status != "RUNNING" {
            break;
        }
        tokio::task::yield_now().await;
    }

    let row = &h.store.executions()[0];
    assert_eq!(row.status, "COMPLETED");
    assert_eq!(row.result, Some(json!({ "sent": true })));
    assert!(h.engine.in_flight().is_empty());
}

/// Marks every new execution CANCELLED as soon as it is created, the way a
/// cancel request arriving before the run registers its token would.
struct CancelOnCreate(Arc<MemoryStore>);

#[async_trait::async_trait]
impl WorkflowStore for CancelOnCreate {
    async fn find_workflow(&self, id: Uuid) -> Result<Option<WorkflowRow>, DbError> {
        self.0.find_workflow(id).await
    }

    async fn find_workflow_by_slug(&self, slug: &str) -> Result<Option<WorkflowRow>, DbError> {
        self.0.find_workflow_by_slug(slug).await
    }

    async fn list_enabled_by_trigger(&self, trigger_type: &str) -> Result<Vec<WorkflowRow>, DbError> {
        self.0.list_enabled_by_trigger(trigger_type).await
    }

    async fn touch_last_run(&self, id: Uuid, at: chrono::DateTime<Utc>) -> Result<(), DbError> {
        self.0.touch_last_run(id, at).await
    }

    async fn create_execution(&self, new: NewExecution) -> Result<WorkflowExecutionRow, DbError> {
        let row = self.0.create_execution(new).await?;
        self.0
            .finish_execution(
                row.id,
                ExecutionFinish {
                    status: ExecutionStatus::Cancelled,
                    result: None,
                    error: Some("cancelled by request".into()),
                },
            )
            .await?;
        Ok(row)
    }

    async fn finish_execution(&self, id: Uuid, finish: ExecutionFinish) -> Result<bool, DbError> {
        self.0.finish_execution(id, finish).await
    }

    async fn get_execution(&self, id: Uuid) -> Result<Option<WorkflowExecutionRow>, DbError> {
        self.0.get_execution(id).await
    }
}

#[tokio::test]
async fn cancel_before_start_runs_no_nodes() {
    let sent = MockHandler::returning(json!({ "sent": true }));
    let h = Harness::new(vec![("send_email", sent.clone(), json!({}))]);
    let wf = manual(
        "welcome",
        vec![trigger(), primitive("send", "send_email", json!({}))],
        vec![edge("start", "send")],
    );
    h.install(&wf);

    let adapter = PrimitiveAdapter::new(h.store.clone(), HandlerRegistry::new(), AdapterConfig::default());
    let engine = WorkflowEngine::new(
        Arc::new(CancelOnCreate(h.store.clone())),
        Arc::new(adapter),
        EngineConfig::default(),
    );

    let outcome = engine
        .execute_workflow(wf.id, TriggerRequest::manual(json!({})))
        .await
        .unwrap();

    assert_eq!(outcome.status, ExecutionStatus::Cancelled);
    assert!(outcome.node_results.is_empty());
    assert_eq!(outcome.error.as_deref(), Some("cancelled by request"));
    assert_eq!(sent.call_count(), 0);
    assert!(engine.in_flight().is_empty());
    assert_eq!(h.store.executions()[0].status, "CANCELLED");
}

#[tokio::test]
async fn cancelled_path_records_the_node_it_stopped_at() {
    let h = Harness::new(vec![]);
    let wf = manual(
        "noop",
        vec![trigger(), output("out", json!({}))],
        vec![edge("start", "out")],
    );
    let graph = WorkflowGraph::new(&wf);
    let config = EngineConfig::default();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let traversal = Traversal::new(&graph, h.engine.primitives(), &config, cancel);

    let results = ResultCollector::default();
    let context = ExecutionContext::new(Uuid::new_v4(), wf.id, json!({}), Map::new());
    let failure = traversal.visit("start", context, &results).await.unwrap_err();

    assert!(failure.error.is_cancellation());
    assert_eq!(failure.context.errors()[0].node_id, "start");
    let recorded = results.take();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].node_id, "start");
    assert!(!recorded[0].success);
    assert_eq!(recorded[0].error.as_deref(), Some("execution cancelled"));
}

// ============================================================
// Trigger entry points
// ============================================================

#[tokio::test]
async fn unknown_and_disabled_workflows_are_errors() {
    let h = Harness::new(vec![]);
    assert!(matches!(
        h.engine.execute_workflow(Uuid::new_v4(), TriggerRequest::manual(json!({}))).await,
        Err(EngineError::WorkflowNotFound(_))
    ));

    let mut wf = manual("off", vec![trigger()], vec![]);
    wf.enabled = false;
    h.install(&wf);
    assert!(matches!(
        h.engine.execute_workflow(wf.id, TriggerRequest::manual(json!({}))).await,
        Err(EngineError::WorkflowDisabled(_))
    ));
    assert!(h.store.executions().is_empty());
}

#[tokio::test]
async fn webhook_runs_by_slug_and_checks_trigger_type() {
    let h = Harness::new(vec![]);
    let hook = WorkflowDefinition::new(
        "Stripe Hook",
        Trigger::Webhook,
        vec![trigger(), output("out", json!({ "kind": "{{event.type}}" }))],
        vec![edge("start", "out")],
    );
    h.install(&hook);

    let outcome = h
        .engine
        .execute_webhook("stripe-hook", json!({ "type": "charge.succeeded" }))
        .await
        .unwrap();
    assert_eq!(outcome.result, Some(json!({ "kind": "charge.succeeded" })));
    assert_eq!(h.store.executions()[0].triggered_by, "webhook");

    let plain = manual("Plain", vec![trigger()], vec![]);
    h.install(&plain);
    assert!(matches!(
        h.engine.execute_webhook("plain", json!({})).await,
        Err(EngineError::TriggerMismatch { .. })
    ));
    assert!(matches!(
        h.engine.execute_webhook("missing", json!({})).await,
        Err(EngineError::WorkflowNotFound(_))
    ));
}

#[tokio::test]
async fn events_reach_only_subscribed_workflows() {
    let h = Harness::new(vec![]);
    let on_order = WorkflowDefinition::new(
        "on order",
        Trigger::Event { event: "order.created".into() },
        vec![trigger()],
        vec![],
    );
    let on_review = WorkflowDefinition::new(
        "on review",
        Trigger::Event { event: "review.created".into() },
        vec![trigger()],
        vec![],
    );
    h.install(&on_order);
    h.install(&on_review);

    let outcomes = h
        .engine
        .dispatch_event("order.created", json!({ "order_id": 7 }))
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].workflow_id, on_order.id);
    assert_eq!(outcomes[0].result, Some(json!({ "start": { "order_id": 7 } })));
}

#[tokio::test]
async fn due_schedules_run_only_when_cron_matches() {
    let h = Harness::new(vec![]);
    let digest = WorkflowDefinition::new(
        "weekly digest",
        Trigger::Schedule { cron: "0 9 * * 1".into() },
        vec![trigger()],
        vec![],
    );
    h.install(&digest);

    // 2024-01-01 was a Monday.
    let monday_nine = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
    let monday_nine_oh_one = Utc.with_ymd_and_hms(2024, 1, 1, 9, 1, 0).unwrap();

    assert!(h.engine.run_due_schedules(monday_nine_oh_one).await.unwrap().is_empty());

    let ran = h.engine.run_due_schedules(monday_nine).await.unwrap();
    assert_eq!(ran.len(), 1);
    assert_eq!(h.store.executions()[0].triggered_by, "schedule");
}
