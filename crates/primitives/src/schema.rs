//! Declared input schemas and their validation.
//!
//! A schema is a flat map from field name to [`FieldSchema`]:
//!
//! ```json
//! { "to": { "type": "string", "required": true },
//!   "priority": { "type": "string", "enum": ["low", "high"] } }
//! ```
//!
//! Validation never stops at the first problem; every failing field is
//! reported in the returned [`ValidationErrors`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON type a field must have.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
    #[default]
    Any,
}

impl FieldType {
    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::Any => true,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
            Self::Any => "any",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    #[serde(rename = "type", default)]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    /// Closed set of accepted values.
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Input schema of a primitive, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InputSchema(pub BTreeMap<String, FieldSchema>);

impl InputSchema {
    /// Parse the stored JSON form. `null` is treated as an empty schema.
    pub fn from_json(value: &Value) -> Result<Self, serde_json::Error> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn field(mut self, name: impl Into<String>, schema: FieldSchema) -> Self {
        self.0.insert(name.into(), schema);
        self
    }
}

/// One failing field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// All field failures for one input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationErrors {
    pub errors: Vec<FieldError>,
}

impl ValidationErrors {
    fn push(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.to_string(),
            message: message.into(),
        });
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.errors.iter().map(|e| e.field.as_str())
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", error.field, error.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Validate `input` against `schema`.
///
/// An empty schema accepts anything.  A `null` field counts as missing.
pub fn validate_primitive_input(schema: &InputSchema, input: &Value) -> Result<(), ValidationErrors> {
    if schema.is_empty() {
        return Ok(());
    }

    let mut errors = ValidationErrors::default();

    let Some(object) = input.as_object() else {
        errors.push("$input", format!("expected an object, got {}", json_type_name(input)));
        return Err(errors);
    };

    for (name, field) in &schema.0 {
        match object.get(name) {
            None | Some(Value::Null) => {
                if field.required {
                    errors.push(name, "is required");
                }
            }
            Some(value) if !field.field_type.accepts(value) => {
                errors.push(
                    name,
                    format!("expected {}, got {}", field.field_type.as_str(), json_type_name(value)),
                );
            }
            Some(value) => {
                if let Some(allowed) = &field.allowed {
                    if !allowed.contains(value) {
                        errors.push(name, format!("must be one of {}", Value::Array(allowed.clone())));
                    }
                }
            }
        }
    }

    if errors.errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn email_schema() -> InputSchema {
        InputSchema::from_json(&json!({
            "to":       { "type": "string", "required": true },
            "subject":  { "type": "string", "required": true },
            "retries":  { "type": "integer" },
            "priority": { "type": "string", "enum": ["low", "high"] }
        }))
        .expect("schema should parse")
    }

    #[test]
    fn empty_schema_accepts_anything() {
        let schema = InputSchema::default();
        assert!(validate_primitive_input(&schema, &json!(null)).is_ok());
        assert!(validate_primitive_input(&schema, &json!([1, 2])).is_ok());
        assert!(InputSchema::from_json(&Value::Null).unwrap().is_empty());
    }

    #[test]
    fn valid_input_passes() {
        let input = json!({ "to": "a@b.com", "subject": "hi", "retries": 2, "priority": "low" });
        assert!(validate_primitive_input(&email_schema(), &input).is_ok());
    }

    #[test]
    fn failures_are_aggregated_per_field() {
        let input = json!({ "subject": 42, "retries": 1.5, "priority": "urgent" });
        let errors = validate_primitive_input(&email_schema(), &input).unwrap_err();

        let fields: Vec<&str> = errors.fields().collect();
        assert_eq!(fields, vec!["priority", "retries", "subject", "to"]);
        assert!(errors.to_string().contains("to: is required"));
        assert!(errors.to_string().contains("subject: expected string, got number"));
    }

    #[test]
    fn null_counts_as_missing() {
        let input = json!({ "to": null, "subject": "x" });
        let errors = validate_primitive_input(&email_schema(), &input).unwrap_err();
        assert_eq!(errors.errors.len(), 1);
        assert_eq!(errors.errors[0].field, "to");
    }

    #[test]
    fn non_object_input_is_rejected() {
        let errors = validate_primitive_input(&email_schema(), &json!("a@b.com")).unwrap_err();
        assert_eq!(errors.errors[0].field, "$input");
    }
}
