//! `/steps` — external completion and manual retry of execution steps.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::domain::errors::DomainError;
use crate::http::errors::AppResult;
use crate::http::state::AppState;

#[derive(Debug, Deserialize, Default)]
pub struct CompleteStepRequest {
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

pub async fn complete(State(state): State<AppState>, Path(id): Path<Uuid>, Json(req): Json<CompleteStepRequest>) -> AppResult<StatusCode> {
    let step = state.ctx.step_repo.get(id).await?.ok_or_else(|| DomainError::not_found("execution step", id))?;
    state.ctx.workflows.complete_step(step.execution_id, &step.step_key, req.output, req.error).await?;
    Ok(StatusCode::OK)
}

pub async fn retry(State(state): State<AppState>, Path(id): Path<Uuid>) -> AppResult<StatusCode> {
    state.ctx.workflows.retry_step(id).await?;
    Ok(StatusCode::OK)
}
