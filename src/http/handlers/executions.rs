//! `/executions` — runtime state for a started workflow.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::domain::ports::execution_repository::ExecutionFilter;
use crate::http::errors::AppResult;
use crate::http::state::AppState;

pub async fn list_executions(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let executions = state.ctx.execution_repo.list(ExecutionFilter::default()).await?;
    Ok(Json(json!(executions)))
}

pub async fn pause(State(state): State<AppState>, Path(id): Path<Uuid>) -> AppResult<StatusCode> {
    state.ctx.workflows.pause_execution(id).await?;
    Ok(StatusCode::OK)
}

pub async fn resume(State(state): State<AppState>, Path(id): Path<Uuid>) -> AppResult<StatusCode> {
    state.ctx.workflows.resume_execution(id).await?;
    Ok(StatusCode::OK)
}

pub async fn cancel(State(state): State<AppState>, Path(id): Path<Uuid>) -> AppResult<StatusCode> {
    state.ctx.workflows.cancel_execution(id).await?;
    Ok(StatusCode::OK)
}

pub async fn steps(State(state): State<AppState>, Path(id): Path<Uuid>) -> AppResult<Json<Value>> {
    state.ctx.workflows.get_execution(id).await?;
    let steps = state.ctx.step_repo.list_for_execution(id).await?;
    Ok(Json(json!(steps)))
}
