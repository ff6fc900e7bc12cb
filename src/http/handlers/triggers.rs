//! `/workflows/:id/triggers` and `/triggers` — event-condition-action rules.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::domain::errors::DomainError;
use crate::domain::models::{Trigger, TriggerCondition, TriggerType};
use crate::http::errors::AppResult;
use crate::http::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateTriggerRequest {
    pub name: String,
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub condition: Option<TriggerCondition>,
    #[serde(default)]
    pub cooldown_ms: Option<u64>,
}

/// The path's `:id` is the workflow this trigger always fires (spec's
/// `Trigger *—1 Workflow` relationship); 404 if it doesn't exist.
pub async fn create_trigger(State(state): State<AppState>, Path(workflow_id): Path<Uuid>, Json(req): Json<CreateTriggerRequest>) -> AppResult<(StatusCode, Json<Value>)> {
    state.ctx.workflow_repo.get(workflow_id).await?.ok_or_else(|| DomainError::not_found("workflow", workflow_id))?;
    let trigger = Trigger::new(req.name, workflow_id, req.trigger_type, req.config, req.condition, req.cooldown_ms);
    let trigger = state.ctx.triggers.create_trigger(trigger).await?;
    Ok((StatusCode::CREATED, Json(json!({ "trigger": trigger }))))
}

pub async fn delete_trigger(State(state): State<AppState>, Path(id): Path<Uuid>) -> AppResult<StatusCode> {
    state.ctx.triggers.get_trigger(id).await?;
    state.ctx.triggers.delete_trigger(id).await?;
    Ok(StatusCode::OK)
}

pub async fn list_triggers(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let triggers = state.ctx.triggers.list_triggers().await?;
    Ok(Json(json!(triggers)))
}

/// Inbound delivery record for a `webhook`-kind trigger: marks it pending so
/// the next trigger tick fires it. The delivery itself carries no payload
/// requirements beyond existing (spec §4.6's `webhook` trigger type).
pub async fn post_webhook_delivery(State(state): State<AppState>, Path(id): Path<Uuid>) -> AppResult<StatusCode> {
    state.ctx.triggers.record_webhook_delivery(id).await?;
    Ok(StatusCode::ACCEPTED)
}
