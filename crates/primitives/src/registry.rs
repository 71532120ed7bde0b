//! Compiled handler registry.
//!
//! Maps `(primitive name, version)` to the handler implementation.  The
//! registry is assembled at startup from code; nothing is loaded or compiled
//! from stored source.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::info;

use crate::PrimitiveHandler;

/// Version key that matches any stored primitive version.
pub const ANY_VERSION: &str = "*";

#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, HashMap<String, Arc<dyn PrimitiveHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for primitive `name` at `version` (or [`ANY_VERSION`]).
    pub fn register(
        &mut self,
        name: impl Into<String>,
        version: impl Into<String>,
        handler: Arc<dyn PrimitiveHandler>,
    ) {
        let name = name.into();
        let version = version.into();
        info!("registering primitive handler {}@{}", name, version);
        self.handlers.entry(name).or_default().insert(version, handler);
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(
        mut self,
        name: impl Into<String>,
        version: impl Into<String>,
        handler: Arc<dyn PrimitiveHandler>,
    ) -> Self {
        self.register(name, version, handler);
        self
    }

    /// Resolve a handler; an exact version wins over a wildcard registration.
    pub fn get(&self, name: &str, version: &str) -> Option<Arc<dyn PrimitiveHandler>> {
        let versions = self.handlers.get(name)?;
        versions
            .get(version)
            .or_else(|| versions.get(ANY_VERSION))
            .cloned()
    }

    /// Registered primitive names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockHandler;
    use serde_json::json;

    #[test]
    fn exact_version_wins_over_wildcard() {
        let v1 = MockHandler::returning(json!({ "v": 1 }));
        let any = MockHandler::returning(json!({ "v": "any" }));
        let registry = HandlerRegistry::new()
            .with("send_email", "1", Arc::new(v1))
            .with("send_email", ANY_VERSION, Arc::new(any));

        assert!(registry.get("send_email", "1").is_some());
        assert!(registry.get("send_email", "7").is_some());
        assert!(registry.get("moderate_review", "1").is_none());
        assert_eq!(registry.names(), vec!["send_email".to_string()]);
    }

    #[test]
    fn version_without_wildcard_is_not_resolved() {
        let registry = HandlerRegistry::new().with(
            "aggregate_analytics",
            "2",
            Arc::new(MockHandler::returning(json!(null))),
        );
        assert!(registry.get("aggregate_analytics", "2").is_some());
        assert!(registry.get("aggregate_analytics", "1").is_none());
    }
}
