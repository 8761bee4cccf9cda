//! `EngineError → ApiError → (StatusCode, Json<ErrorEnvelope>)`, mirroring
//! the teacher's `ApiError` adapter (`api/models/errors.rs`).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::error::{ErrorCategory, EngineError};

pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ApiError(err)
    }
}

#[derive(Serialize)]
struct ApiErrorBody {
    success: bool,
    error: crate::error::ErrorEnvelope,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.category() {
            ErrorCategory::Validation => StatusCode::BAD_REQUEST,
            ErrorCategory::Business => match &self.0 {
                EngineError::TaskNotFound { .. } | EngineError::WorkflowNotFound { .. } | EngineError::SnapshotNotFound { .. } => {
                    StatusCode::NOT_FOUND
                }
                _ => StatusCode::BAD_REQUEST,
            },
            ErrorCategory::Auth => StatusCode::UNAUTHORIZED,
            ErrorCategory::Network | ErrorCategory::ExternalService => StatusCode::BAD_GATEWAY,
            ErrorCategory::Database | ErrorCategory::System => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = ApiErrorBody {
            success: false,
            error: self.0.envelope(),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
