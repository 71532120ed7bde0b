//! Capabilities handed to a primitive handler.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info};
use uuid::Uuid;

use crate::HandlerError;

/// Read-only metadata about the primitive being executed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrimitiveInfo {
    pub id: Uuid,
    pub name: String,
    pub category: String,
    pub version: String,
    pub timeout_ms: u64,
}

/// Environment variables a handler may read.
///
/// Built from an explicit allow-list; variables not on the list are never
/// captured, so a handler cannot see the rest of the process environment.
#[derive(Debug, Clone, Default)]
pub struct EnvView {
    vars: BTreeMap<String, String>,
}

impl EnvView {
    /// Capture the allowed variables from the current process environment.
    pub fn from_process(allow_list: &[String]) -> Self {
        let vars = allow_list
            .iter()
            .filter_map(|key| std::env::var(key).ok().map(|value| (key.clone(), value)))
            .collect();
        Self { vars }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }
}

/// Outbound HTTP request issued through [`HandlerContext::fetch`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchRequest {
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Strings are sent verbatim; any other JSON value is sent as a JSON body.
    #[serde(default)]
    pub body: Option<Value>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: default_method(),
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    /// Parsed JSON when the body is valid JSON, otherwise the raw text.
    pub body: Value,
}

/// Context passed to every [`crate::PrimitiveHandler::call`].
#[derive(Debug, Clone)]
pub struct HandlerContext {
    primitive: PrimitiveInfo,
    http: reqwest::Client,
    env: EnvView,
}

impl HandlerContext {
    pub fn new(primitive: PrimitiveInfo, http: reqwest::Client, env: EnvView) -> Self {
        Self { primitive, http, env }
    }

    pub fn primitive(&self) -> &PrimitiveInfo {
        &self.primitive
    }

    /// Log an informational message namespaced by primitive name.
    pub fn log(&self, message: impl AsRef<str>) {
        info!(primitive = %self.primitive.name, "{}", message.as_ref());
    }

    /// Log an error message namespaced by primitive name.
    pub fn error(&self, message: impl AsRef<str>) {
        error!(primitive = %self.primitive.name, "{}", message.as_ref());
    }

    /// Read an allow-listed environment variable.
    pub fn env(&self, key: &str) -> Option<&str> {
        self.env.get(key)
    }

    pub async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, HandlerError> {
        let method = reqwest::Method::from_bytes(request.method.to_uppercase().as_bytes())
            .map_err(|_| HandlerError::Fetch(format!("invalid HTTP method '{}'", request.method)))?;

        let mut builder = self.http.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match request.body {
            Some(Value::String(text)) => builder.body(text),
            Some(json) => builder.json(&json),
            None => builder,
        };

        let response = builder
            .send()
            .await
            .map_err(|e| HandlerError::Fetch(e.to_string()))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect();
        let text = response
            .text()
            .await
            .map_err(|e| HandlerError::Fetch(format!("failed to read response: {e}")))?;
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));

        Ok(FetchResponse { status, headers, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_view_only_exposes_allow_listed_keys() {
        std::env::set_var("PRIMITIVES_TEST_ALLOWED", "yes");
        std::env::set_var("PRIMITIVES_TEST_HIDDEN", "secret");

        let view = EnvView::from_process(&["PRIMITIVES_TEST_ALLOWED".to_string()]);
        assert_eq!(view.get("PRIMITIVES_TEST_ALLOWED"), Some("yes"));
        assert_eq!(view.get("PRIMITIVES_TEST_HIDDEN"), None);
        assert_eq!(view.vars.len(), 1);
    }

    #[test]
    fn fetch_request_defaults_to_get() {
        let request: FetchRequest =
            serde_json::from_value(serde_json::json!({ "url": "http://localhost/" })).unwrap();
        assert_eq!(request.method, "GET");
        assert!(request.headers.is_empty());
        assert!(request.body.is_none());
    }
}
