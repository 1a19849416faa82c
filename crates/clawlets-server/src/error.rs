//! HTTP error mapping.
//!
//! Engine errors map onto status codes; bodies are always
//! `{error, message}` JSON. Internal storage failures are logged and
//! answered with an opaque message.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use clawlets_core::EngineError;
use serde::Serialize;

/// API-facing error wrapper.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ApiError(#[from] pub EngineError);

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            EngineError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            EngineError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            EngineError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            EngineError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            EngineError::RateLimited(msg) => (StatusCode::TOO_MANY_REQUESTS, msg.clone()),
            EngineError::Store(e) => {
                tracing::error!(error = %e, "storage failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_owned(),
                )
            }
        };
        let body = ErrorBody {
            error: self.0.code(),
            message,
        };
        (status, axum::Json(body)).into_response()
    }
}
