//! Domain-level error taxonomy shared by every port and service.

use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by component operations. The HTTP surface is the sole
/// translator from these into status codes (see `http::errors`); no other
/// layer maps a `DomainError` to a transport-specific representation.
#[derive(Debug, Error)]
pub enum DomainError {
    /// Input failed a declared validation rule.
    #[error("validation failed: {0}")]
    ValidationFailure(String),

    /// Entity id unknown to the owning component.
    #[error("not found: {0}")]
    NotFound(String),

    /// Unique constraint violated (duplicate handle, duplicate workflow name, double-accept).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Operation not valid from the entity's current state.
    #[error("wrong state: {0}")]
    WrongState(String),

    /// A configured concurrency cap was hit (max workers, max retries, max depth).
    #[error("limit reached: {0}")]
    LimitReached(String),

    /// An external collaborator required for this operation is unavailable.
    #[error("dependency missing: {0}")]
    DependencyMissing(String),

    /// Unexpected fault. The cause is logged with `trace_id`, never returned to the caller.
    #[error("internal error (trace {trace_id})")]
    InternalFailure { trace_id: Uuid, source: String },
}

impl DomainError {
    pub fn internal(source: impl std::fmt::Display) -> Self {
        let trace_id = Uuid::new_v4();
        tracing::error!(%trace_id, error = %source, "internal failure");
        Self::InternalFailure { trace_id, source: source.to_string() }
    }

    pub fn not_found(entity: &str, id: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("{entity} {id}"))
    }
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("row".to_string()),
            other => Self::internal(other),
        }
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        Self::ValidationFailure(format!("invalid json: {err}"))
    }
}

impl From<uuid::Error> for DomainError {
    fn from(err: uuid::Error) -> Self {
        Self::ValidationFailure(format!("invalid uuid: {err}"))
    }
}
