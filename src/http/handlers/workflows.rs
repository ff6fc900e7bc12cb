//! `/workflows` — DAG definitions and execution starts.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::domain::errors::DomainError;
use crate::domain::models::{StepDefinition, Workflow, WorkflowInput};
use crate::http::errors::AppResult;
use crate::http::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateWorkflowRequest {
    pub name: String,
    pub steps: Vec<StepDefinition>,
    #[serde(default)]
    pub inputs: Vec<WorkflowInput>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub on_complete: Option<String>,
    #[serde(default)]
    pub on_failure: Option<String>,
}

pub async fn create_workflow(State(state): State<AppState>, Json(req): Json<CreateWorkflowRequest>) -> AppResult<(StatusCode, Json<Value>)> {
    if state.ctx.workflow_repo.get_by_name(&req.name).await?.is_some() {
        return Err(DomainError::Conflict(format!("workflow name in use: {}", req.name)).into());
    }
    let mut workflow = Workflow::new(req.name, req.steps);
    workflow.inputs = req.inputs;
    workflow.outputs = req.outputs;
    workflow.timeout_ms = req.timeout_ms;
    workflow.on_complete = req.on_complete;
    workflow.on_failure = req.on_failure;
    workflow.validate().map_err(|e| DomainError::ValidationFailure(e.to_string()))?;

    state.ctx.workflow_repo.create(&workflow).await?;
    Ok((StatusCode::CREATED, Json(json!({ "workflow": workflow }))))
}

pub async fn get_workflow(State(state): State<AppState>, Path(id): Path<Uuid>) -> AppResult<Json<Value>> {
    let workflow = state.ctx.workflow_repo.get(id).await?.ok_or_else(|| DomainError::not_found("workflow", id))?;
    Ok(Json(json!(workflow)))
}

#[derive(Debug, Deserialize, Default)]
pub struct StartWorkflowRequest {
    #[serde(default = "default_created_by")]
    pub created_by: String,
    #[serde(default)]
    pub inputs: Value,
    #[serde(default)]
    pub swarm_id: Option<Uuid>,
}

fn default_created_by() -> String {
    "api".to_string()
}

pub async fn start_workflow(State(state): State<AppState>, Path(id): Path<Uuid>, Json(req): Json<StartWorkflowRequest>) -> AppResult<(StatusCode, Json<Value>)> {
    let execution = state.ctx.workflows.start_workflow(id, req.created_by, req.inputs, req.swarm_id).await?;
    Ok((StatusCode::CREATED, Json(json!({ "execution": execution }))))
}
