//! `/spawn-queue` — priority + dependency admission ahead of the supervisor.

use std::collections::HashSet;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::domain::models::{Priority, SpawnPayload};
use crate::http::errors::AppResult;
use crate::http::state::AppState;

#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    pub requester_handle: String,
    pub target_agent_type: String,
    #[serde(default)]
    pub depth_level: u32,
    pub payload: SpawnPayload,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub depends_on: HashSet<Uuid>,
}

pub async fn enqueue(State(state): State<AppState>, Json(req): Json<EnqueueRequest>) -> AppResult<(StatusCode, Json<Value>)> {
    let item = state
        .ctx
        .spawn_queue
        .enqueue(req.requester_handle, req.target_agent_type, req.depth_level, req.payload, req.priority, req.depends_on)
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "request_id": item.id }))))
}

pub async fn status(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let stats = state.ctx.spawn_queue.get_stats().await?;
    Ok(Json(json!({
        "ready": stats.ready,
        "blocked": stats.blocked,
        "by_status": stats.by_status,
        "by_priority": stats.by_priority,
    })))
}
