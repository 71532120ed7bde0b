//! `MockHandler`: a test double for `PrimitiveHandler`.
//!
//! Useful in unit and integration tests where a real handler is either
//! unavailable or irrelevant.  Clones share the recorded calls, so a test can
//! keep one copy for assertions and register another.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::{HandlerContext, HandlerError, PrimitiveHandler};

/// Behaviour injected into `MockHandler` at construction time.
#[derive(Debug, Clone)]
pub enum MockBehaviour {
    /// Return a specific JSON value.
    ReturnValue(Value),
    /// Return the input unchanged.
    Echo,
    /// Fail with a handler error.
    Fail(String),
    /// Sleep, then return the value. Used to exercise timeouts and cancellation.
    Sleep(Duration, Value),
}

/// A mock handler that records every input it receives and returns a
/// programmer-specified result.
#[derive(Debug, Clone)]
pub struct MockHandler {
    pub behaviour: MockBehaviour,
    calls: Arc<Mutex<Vec<Value>>>,
}

impl MockHandler {
    fn with_behaviour(behaviour: MockBehaviour) -> Self {
        Self {
            behaviour,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock that always succeeds with the given value.
    pub fn returning(value: Value) -> Self {
        Self::with_behaviour(MockBehaviour::ReturnValue(value))
    }

    /// Create a mock that returns its input.
    pub fn echo() -> Self {
        Self::with_behaviour(MockBehaviour::Echo)
    }

    /// Create a mock that always fails.
    pub fn failing(msg: impl Into<String>) -> Self {
        Self::with_behaviour(MockBehaviour::Fail(msg.into()))
    }

    /// Create a mock that sleeps before answering.
    pub fn sleeping(duration: Duration, value: Value) -> Self {
        Self::with_behaviour(MockBehaviour::Sleep(duration, value))
    }

    /// Number of times this handler has been called.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// All inputs seen so far, in call order.
    pub fn calls(&self) -> Vec<Value> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl PrimitiveHandler for MockHandler {
    async fn call(&self, input: Value, _ctx: &HandlerContext) -> Result<Value, HandlerError> {
        self.calls.lock().push(input.clone());

        match &self.behaviour {
            MockBehaviour::ReturnValue(v) => Ok(v.clone()),
            MockBehaviour::Echo => Ok(input),
            MockBehaviour::Fail(msg) => Err(HandlerError::Failed(msg.clone())),
            MockBehaviour::Sleep(duration, v) => {
                tokio::time::sleep(*duration).await;
                Ok(v.clone())
            }
        }
    }
}
