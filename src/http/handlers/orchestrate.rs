//! `/orchestrate` — worker spawn, dismissal, messaging, and output retrieval.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::domain::errors::DomainError;
use crate::domain::models::SpawnMode;
use crate::http::errors::AppResult;
use crate::http::state::AppState;
use crate::services::SpawnWorkerRequest;

#[derive(Debug, Deserialize)]
pub struct SpawnWorkerBody {
    pub handle: String,
    #[serde(default)]
    pub team_name: Option<String>,
    #[serde(default)]
    pub swarm_id: Option<Uuid>,
    pub working_dir: String,
    #[serde(default)]
    pub initial_prompt: Option<String>,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub spawn_mode: SpawnMode,
    #[serde(default)]
    pub depth_level: u32,
}

pub async fn spawn(State(state): State<AppState>, Json(req): Json<SpawnWorkerBody>) -> AppResult<(StatusCode, Json<Value>)> {
    let worker = state
        .ctx
        .workers
        .spawn_worker(SpawnWorkerRequest {
            handle: req.handle,
            team_name: req.team_name,
            swarm_id: req.swarm_id,
            working_dir: req.working_dir,
            initial_prompt: req.initial_prompt,
            program: req.program,
            args: req.args,
            spawn_mode: req.spawn_mode,
            depth_level: req.depth_level,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "worker": worker }))))
}

pub async fn dismiss(State(state): State<AppState>, Path(handle): Path<String>) -> AppResult<StatusCode> {
    state.ctx.workers.dismiss_worker_by_handle(&handle).await?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
pub struct SendMessageBody {
    pub message: String,
}

pub async fn send(State(state): State<AppState>, Path(handle): Path<String>, Json(req): Json<SendMessageBody>) -> AppResult<StatusCode> {
    if req.message.is_empty() {
        return Err(DomainError::ValidationFailure("message must not be empty".to_string()).into());
    }
    let found = state.ctx.workers.send_to_worker_by_handle(&handle, &req.message).await?;
    if !found {
        return Err(DomainError::not_found("worker", &handle).into());
    }
    Ok(StatusCode::OK)
}

pub async fn workers(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let workers = state.ctx.workers.get_workers().await?;
    Ok(Json(json!(workers)))
}

#[derive(Debug, Deserialize)]
pub struct OutputQuery {
    #[serde(default = "default_output_lines")]
    pub n: usize,
}

fn default_output_lines() -> usize {
    100
}

pub async fn output(State(state): State<AppState>, Path(handle): Path<String>, Query(q): Query<OutputQuery>) -> AppResult<Json<Value>> {
    let output = state.ctx.workers.get_output_by_handle(&handle, q.n).await?;
    Ok(Json(json!({ "output": output })))
}
