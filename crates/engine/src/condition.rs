//! Condition trees used by condition nodes and edge guards.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::ExecutionContext;
use crate::expression::{evaluate_expression, is_truthy, loose_equal};
use crate::resolver::resolve_value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    StartsWith,
    EndsWith,
    In,
    NotIn,
    Exists,
}

/// `field <operator> value`, where `field` is a resolver path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleCondition {
    pub field: String,
    pub operator: Operator,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Condition {
    Simple(SimpleCondition),
    Expression { expression: String },
    /// True when every child is true (vacuously true when empty).
    All { conditions: Vec<Condition> },
    /// True when at least one child is true.
    Any { conditions: Vec<Condition> },
    /// True when no child is true.
    None { conditions: Vec<Condition> },
}

impl Condition {
    pub fn simple(field: impl Into<String>, operator: Operator, value: Value) -> Self {
        Condition::Simple(SimpleCondition {
            field: field.into(),
            operator,
            value,
        })
    }

    pub fn expression(expression: impl Into<String>) -> Self {
        Condition::Expression {
            expression: expression.into(),
        }
    }
}

pub fn evaluate_condition(condition: &Condition, context: &ExecutionContext) -> bool {
    match condition {
        Condition::Simple(simple) => evaluate_simple_condition(simple, context),
        Condition::Expression { expression } => {
            evaluate_expression(expression, context).is_some_and(|v| is_truthy(&v))
        }
        Condition::All { conditions } => conditions.iter().all(|c| evaluate_condition(c, context)),
        Condition::Any { conditions } => conditions.iter().any(|c| evaluate_condition(c, context)),
        Condition::None { conditions } => !conditions.iter().any(|c| evaluate_condition(c, context)),
    }
}

pub fn evaluate_simple_condition(condition: &SimpleCondition, context: &ExecutionContext) -> bool {
    let actual = resolve_value(context, &condition.field).unwrap_or(Value::Null);
    let expected = &condition.value;

    match condition.operator {
        Operator::Exists => {
            let wanted = expected.as_bool().unwrap_or(true);
            !actual.is_null() == wanted
        }
        Operator::Eq => loose_equal(&actual, expected),
        Operator::Neq => !loose_equal(&actual, expected),
        Operator::Gt => compare_numbers(&actual, expected, |a, b| a > b),
        Operator::Gte => compare_numbers(&actual, expected, |a, b| a >= b),
        Operator::Lt => compare_numbers(&actual, expected, |a, b| a < b),
        Operator::Lte => compare_numbers(&actual, expected, |a, b| a <= b),
        Operator::Contains => match (&actual, expected) {
            (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
            (Value::Array(items), needle) => items.iter().any(|item| loose_equal(item, needle)),
            _ => false,
        },
        Operator::StartsWith => match (&actual, expected) {
            (Value::String(s), Value::String(prefix)) => s.starts_with(prefix.as_str()),
            _ => false,
        },
        Operator::EndsWith => match (&actual, expected) {
            (Value::String(s), Value::String(suffix)) => s.ends_with(suffix.as_str()),
            _ => false,
        },
        Operator::In => match expected {
            Value::Array(items) => items.iter().any(|item| loose_equal(&actual, item)),
            _ => false,
        },
        Operator::NotIn => match expected {
            Value::Array(items) => !items.iter().any(|item| loose_equal(&actual, item)),
            _ => false,
        },
    }
}

/// Both operands must already be numbers; strings are not coerced.
fn compare_numbers(actual: &Value, expected: &Value, cmp: impl Fn(f64, f64) -> bool) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => cmp(a, b),
            _ => false,
        },
        _ => false,
    }
}
