//! Built-in primitive handlers.
//!
//! Integrations owned by the surrounding application (email, review
//! moderation, analytics) register their own handlers next to these.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use db::models::PrimitiveRow;

use crate::{FetchRequest, HandlerContext, HandlerError, HandlerRegistry, PrimitiveHandler};

pub const HTTP_REQUEST: &str = "http_request";
pub const LOG: &str = "log";

/// Issue an HTTP request through the context's `fetch` capability.
///
/// Input: `{ method?, url, headers?, body? }`.
/// Output: `{ status, headers, body }`.
pub struct HttpRequestHandler;

#[async_trait]
impl PrimitiveHandler for HttpRequestHandler {
    async fn call(&self, input: Value, ctx: &HandlerContext) -> Result<Value, HandlerError> {
        let request: FetchRequest = serde_json::from_value(input)
            .map_err(|e| HandlerError::failed(format!("invalid request: {e}")))?;

        ctx.log(format!("{} {}", request.method, request.url));
        let response = ctx.fetch(request).await?;
        ctx.log(format!("response status: {}", response.status));

        serde_json::to_value(response).map_err(|e| HandlerError::failed(e.to_string()))
    }
}

/// Emit a message through the context logger.
///
/// Input: `{ message, level? }` where `level` is `info` (default) or `error`.
pub struct LogHandler;

#[async_trait]
impl PrimitiveHandler for LogHandler {
    async fn call(&self, input: Value, ctx: &HandlerContext) -> Result<Value, HandlerError> {
        let message = match input.get("message") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };

        match input.get("level").and_then(Value::as_str) {
            Some("error") => ctx.error(&message),
            _ => ctx.log(&message),
        }

        Ok(json!({ "logged": true, "message": message }))
    }
}

/// Register every built-in handler under the wildcard version.
pub fn register_builtins(registry: &mut HandlerRegistry) {
    registry.register(HTTP_REQUEST, crate::registry::ANY_VERSION, Arc::new(HttpRequestHandler));
    registry.register(LOG, crate::registry::ANY_VERSION, Arc::new(LogHandler));
}

/// Definitions for the built-in handlers, for stores that are not seeded
/// from a database.
pub fn builtin_rows() -> Vec<PrimitiveRow> {
    let now = Utc::now();
    vec![
        PrimitiveRow {
            id: Uuid::new_v4(),
            name: HTTP_REQUEST.to_string(),
            category: "integration".to_string(),
            input_schema: json!({
                "url":     { "type": "string", "required": true },
                "method":  { "type": "string", "enum": ["GET", "POST", "PUT", "PATCH", "DELETE"] },
                "headers": { "type": "object" }
            }),
            timeout_ms: 30_000,
            enabled: true,
            version: "1".to_string(),
            created_at: now,
        },
        PrimitiveRow {
            id: Uuid::new_v4(),
            name: LOG.to_string(),
            category: "utility".to_string(),
            input_schema: json!({
                "message": { "required": true },
                "level":   { "type": "string", "enum": ["info", "error"] }
            }),
            timeout_ms: 1_000,
            enabled: true,
            version: "1".to_string(),
            created_at: now,
        },
    ]
}
