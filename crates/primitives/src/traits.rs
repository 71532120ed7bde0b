//! The `PrimitiveHandler` trait: the contract every primitive implementation must fulfil.

use async_trait::async_trait;
use serde_json::Value;

use crate::{HandlerContext, HandlerError};

/// Executable body of a primitive.
///
/// Handlers receive input that has already passed the primitive's schema
/// validation, and a [`HandlerContext`] with the capabilities they are
/// allowed to use.  The returned JSON becomes the primitive node's output.
#[async_trait]
pub trait PrimitiveHandler: Send + Sync {
    async fn call(&self, input: Value, ctx: &HandlerContext) -> Result<Value, HandlerError>;
}
