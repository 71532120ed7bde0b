//! `engine` crate: domain models, definition validation, value resolution,
//! conditions, scheduling and the workflow execution engine.

pub mod condition;
pub mod config;
pub mod context;
pub mod dag;
pub mod engine;
pub mod error;
pub mod executor;
pub mod expression;
pub mod models;
pub mod resolver;
pub mod scheduler;

pub use condition::{evaluate_condition, evaluate_simple_condition, Condition, Operator, SimpleCondition};
pub use config::EngineConfig;
pub use context::{ContextError, ExecutionContext};
pub use dag::validate_definition;
pub use engine::{ExecutionOutcome, TriggerRequest, WorkflowEngine};
pub use error::EngineError;
pub use executor::{NodeRunResult, ResultCollector};
pub use expression::{evaluate_expression, Expression, ExpressionError};
pub use models::{NodeType, Trigger, TriggerKind, WorkflowDefinition, WorkflowEdge, WorkflowNode};
pub use resolver::{resolve_input_mapping, resolve_template, resolve_value, InputMapping, MappingValue};
pub use scheduler::{should_run_scheduled_workflow, CronError, CronPattern};

#[cfg(test)]
mod executor_tests;
