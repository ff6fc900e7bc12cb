//! `/blackboard` — per-swarm message log.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::domain::models::{MessageType, Priority, ReadFilter};
use crate::http::errors::AppResult;
use crate::http::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PostMessageRequest {
    pub swarm_id: Uuid,
    pub sender_handle: String,
    pub message_type: MessageType,
    #[serde(default)]
    pub target_handle: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub payload: Value,
}

pub async fn post_message(State(state): State<AppState>, Json(req): Json<PostMessageRequest>) -> AppResult<(StatusCode, Json<Value>)> {
    let message = state
        .ctx
        .blackboard
        .post_message(req.swarm_id, req.sender_handle, req.message_type, req.target_handle, req.priority, req.payload)
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "id": message.id }))))
}

#[derive(Debug, Deserialize, Default)]
pub struct ReadMessagesQuery {
    pub message_type: Option<MessageType>,
    pub priority: Option<Priority>,
    #[serde(default)]
    pub unread_only: bool,
    pub reader_handle: Option<String>,
    #[serde(default)]
    pub include_archived: bool,
    pub limit: Option<usize>,
}

pub async fn read_messages(State(state): State<AppState>, Path(swarm_id): Path<Uuid>, Query(q): Query<ReadMessagesQuery>) -> AppResult<Json<Value>> {
    let filter = ReadFilter {
        message_type: q.message_type,
        priority: q.priority,
        unread_only: q.unread_only,
        reader_handle: q.reader_handle,
        include_archived: q.include_archived,
        limit: q.limit,
    };
    let messages = state.ctx.blackboard.read_messages(swarm_id, filter).await?;
    Ok(Json(json!(messages)))
}

#[derive(Debug, Deserialize)]
pub struct MarkReadRequest {
    pub message_ids: Vec<Uuid>,
    pub reader_handle: String,
}

pub async fn mark_read(State(state): State<AppState>, Json(req): Json<MarkReadRequest>) -> AppResult<Json<Value>> {
    state.ctx.blackboard.mark_read(&req.message_ids, &req.reader_handle).await?;
    Ok(Json(json!({ "marked": req.message_ids.len() })))
}

#[derive(Debug, Deserialize)]
pub struct ArchiveRequest {
    pub message_ids: Vec<Uuid>,
}

pub async fn archive(State(state): State<AppState>, Json(req): Json<ArchiveRequest>) -> AppResult<Json<Value>> {
    state.ctx.blackboard.archive(&req.message_ids).await?;
    Ok(Json(json!({ "archived": req.message_ids.len() })))
}
