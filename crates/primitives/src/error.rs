//! Primitive-level error types.

use thiserror::Error;

use crate::ValidationErrors;

/// Errors returned by a handler's `call` method.
#[derive(Debug, Error, Clone)]
pub enum HandlerError {
    /// The handler ran and reported a failure.
    #[error("{0}")]
    Failed(String),

    /// The `fetch` capability could not complete the request.
    #[error("fetch failed: {0}")]
    Fetch(String),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Errors produced by [`crate::PrimitiveAdapter`].
#[derive(Debug, Error)]
pub enum PrimitiveError {
    #[error("primitive not found: {0}")]
    NotFound(String),

    #[error("primitive '{0}' is disabled")]
    Disabled(String),

    #[error("invalid input for primitive '{primitive}': {errors}")]
    Validation {
        primitive: String,
        errors: ValidationErrors,
    },

    /// The stored input schema could not be parsed.
    #[error("primitive '{primitive}' has an invalid input schema: {message}")]
    InvalidSchema { primitive: String, message: String },

    #[error("no handler registered for primitive '{name}' version '{version}'")]
    HandlerNotRegistered { name: String, version: String },

    #[error("primitive '{primitive}' failed: {source}")]
    Handler {
        primitive: String,
        #[source]
        source: HandlerError,
    },

    #[error("primitive '{primitive}' timed out after {timeout_ms}ms")]
    Timeout { primitive: String, timeout_ms: u64 },

    #[error("primitive '{primitive}' was cancelled")]
    Cancelled { primitive: String },

    #[error("database error: {0}")]
    Store(#[from] db::DbError),
}
