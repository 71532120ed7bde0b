//! Value resolution: dotted paths, `{{path}}` templates and input mappings.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::context::{ExecutionContext, Root, Scope};
use crate::expression::evaluate_expression;

/// Resolve a dotted path such as `trigger.order.items.0.sku` against the
/// context.  Returns `None` for an unknown root or when any segment is
/// missing.
pub fn resolve_value(context: &ExecutionContext, path: &str) -> Option<Value> {
    resolve_in_scope(&context.scope(), path)
}

pub(crate) fn resolve_in_scope(scope: &Scope<'_>, path: &str) -> Option<Value> {
    let path = path.trim();
    if path.is_empty() {
        return None;
    }

    let mut segments = path.split('.');
    let root = scope.root(segments.next()?)?;

    let mut current = match root {
        Root::Value(v) => v,
        Root::Map(m) => match segments.next() {
            Some(key) => m.get(key)?,
            None => return Some(root.to_value()),
        },
    };
    for segment in segments {
        current = step(current, segment)?;
    }
    Some(current.clone())
}

/// One level of property access.  Numeric segments index arrays.
pub(crate) fn step<'v>(value: &'v Value, segment: &str) -> Option<&'v Value> {
    match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

/// Replace every `{{ path }}` with the string form of the resolved value.
/// Absent values and `null` render as the empty string; an unterminated
/// `{{` is kept verbatim.
pub fn resolve_template(template: &str, context: &ExecutionContext) -> String {
    let scope = context.scope();
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                if let Some(value) = resolve_in_scope(&scope, &after[..end]) {
                    out.push_str(&display(&value));
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Strings render raw, `null` as empty, everything else as compact JSON.
pub(crate) fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Input mapping
// ---------------------------------------------------------------------------

/// Explicitly typed mapping entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TypedMapping {
    Static {
        #[serde(default)]
        value: Value,
    },
    Reference {
        path: String,
    },
    Expression {
        expression: String,
    },
    Template {
        template: String,
    },
}

/// A single input-mapping entry.
///
/// A bare string is template shorthand; any other JSON that is not a typed
/// entry is a static value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MappingValue {
    Typed(TypedMapping),
    Shorthand(String),
    Literal(Value),
}

pub type InputMapping = BTreeMap<String, MappingValue>;

pub fn resolve_mapping_value(mapping: &MappingValue, context: &ExecutionContext) -> Value {
    let resolved = match mapping {
        MappingValue::Typed(TypedMapping::Static { value }) | MappingValue::Literal(value) => {
            Some(value.clone())
        }
        MappingValue::Typed(TypedMapping::Reference { path }) => resolve_value(context, path),
        MappingValue::Typed(TypedMapping::Expression { expression }) => {
            evaluate_expression(expression, context)
        }
        MappingValue::Typed(TypedMapping::Template { template })
        | MappingValue::Shorthand(template) => {
            Some(Value::String(resolve_template(template, context)))
        }
    };
    resolved.unwrap_or(Value::Null)
}

/// Resolve every entry independently; absent entries become `null`.
pub fn resolve_input_mapping(mapping: &InputMapping, context: &ExecutionContext) -> Map<String, Value> {
    mapping
        .iter()
        .map(|(key, entry)| (key.clone(), resolve_mapping_value(entry, context)))
        .collect()
}
