//! `/swarms` — swarm lifecycle.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::http::errors::AppResult;
use crate::http::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateSwarmRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_max_agents")]
    pub max_agents: u32,
}

fn default_max_agents() -> u32 {
    10
}

pub async fn create_swarm(State(state): State<AppState>, Json(req): Json<CreateSwarmRequest>) -> AppResult<(StatusCode, Json<Value>)> {
    let swarm = state.ctx.swarms.create(req.name, req.description, req.max_agents).await?;
    Ok((StatusCode::CREATED, Json(json!({ "swarm": swarm }))))
}

pub async fn list_swarms(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let swarms = state.ctx.swarms.list_alive().await?;
    Ok(Json(json!(swarms)))
}

pub async fn kill_swarm(State(state): State<AppState>, Path(id): Path<Uuid>) -> AppResult<StatusCode> {
    state.ctx.swarms.kill(id).await?;
    Ok(StatusCode::OK)
}
