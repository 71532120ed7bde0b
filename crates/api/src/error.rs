use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use engine::EngineError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("execution not found: {0}")]
    ExecutionNotFound(Uuid),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::ExecutionNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Engine(e) => match e {
                EngineError::WorkflowNotFound(_) | EngineError::Database(db::DbError::NotFound) => {
                    StatusCode::NOT_FOUND
                }
                EngineError::WorkflowDisabled(_) => StatusCode::CONFLICT,
                EngineError::TriggerMismatch { .. } => StatusCode::BAD_REQUEST,
                EngineError::InvalidDefinition(_) => StatusCode::UNPROCESSABLE_ENTITY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("request failed: {}", self);
        }
        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}
