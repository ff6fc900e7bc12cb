//! Maps `DomainError` onto the HTTP status/body table (spec §7). This is the
//! sole translator from the domain error taxonomy into a transport
//! representation; every other layer only ever sees `DomainError`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::domain::errors::DomainError;

pub struct AppError(pub DomainError);

impl From<DomainError> for AppError {
    fn from(err: DomainError) -> Self {
        Self(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self.0 {
            DomainError::ValidationFailure(message) => (StatusCode::BAD_REQUEST, json!({ "error": message })),
            DomainError::NotFound(message) => (StatusCode::NOT_FOUND, json!({ "error": message })),
            DomainError::Conflict(message) => (StatusCode::CONFLICT, json!({ "error": message })),
            DomainError::WrongState(message) => (StatusCode::BAD_REQUEST, json!({ "error": message })),
            DomainError::LimitReached(message) => (StatusCode::BAD_REQUEST, json!({ "error": message })),
            DomainError::DependencyMissing(message) => (StatusCode::SERVICE_UNAVAILABLE, json!({ "error": message })),
            DomainError::InternalFailure { trace_id, source } => {
                tracing::error!(%trace_id, error = %source, "internal failure surfaced at the HTTP boundary");
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": "internal error", "traceId": trace_id }))
            }
        };
        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
