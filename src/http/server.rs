//! Assembles the axum `Router` per the HTTP surface's route table and
//! binds it to a TCP listener, matching the teacher's
//! `Router::new()....with_state(state)` / `axum::serve(listener, app)`
//! bootstrap.

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers::{auth, blackboard, executions, orchestrate, spawn_queue, steps, swarms, triggers, workflows};
use crate::http::state::AppState;
use crate::http::ws;
use crate::services::ServerContext;

async fn healthz(axum::extract::State(state): axum::extract::State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "subscribers": state.ctx.event_bus.subscriber_count(),
    }))
}

pub fn build_router(ctx: Arc<ServerContext>) -> Router {
    let state = AppState::new(ctx);

    Router::new()
        .route("/healthz", get(healthz))
        .route("/auth", post(auth::authenticate))
        .route("/swarms", post(swarms::create_swarm).get(swarms::list_swarms))
        .route("/swarms/:id/kill", post(swarms::kill_swarm))
        .route("/blackboard", post(blackboard::post_message))
        .route("/blackboard/:swarmId", get(blackboard::read_messages))
        .route("/blackboard/mark-read", post(blackboard::mark_read))
        .route("/blackboard/archive", post(blackboard::archive))
        .route("/spawn-queue", post(spawn_queue::enqueue))
        .route("/spawn-queue/status", get(spawn_queue::status))
        .route("/orchestrate/spawn", post(orchestrate::spawn))
        .route("/orchestrate/dismiss/:handle", post(orchestrate::dismiss))
        .route("/orchestrate/send/:handle", post(orchestrate::send))
        .route("/orchestrate/workers", get(orchestrate::workers))
        .route("/orchestrate/output/:handle", get(orchestrate::output))
        .route("/workflows", post(workflows::create_workflow))
        .route("/workflows/:id", get(workflows::get_workflow))
        .route("/workflows/:id/start", post(workflows::start_workflow))
        .route("/workflows/:id/triggers", post(triggers::create_trigger))
        .route("/triggers", get(triggers::list_triggers))
        .route("/triggers/:id", delete(triggers::delete_trigger))
        .route("/triggers/:id/webhook", post(triggers::post_webhook_delivery))
        .route("/executions", get(executions::list_executions))
        .route("/executions/:id/pause", post(executions::pause))
        .route("/executions/:id/resume", post(executions::resume))
        .route("/executions/:id/cancel", post(executions::cancel))
        .route("/executions/:id/steps", get(executions::steps))
        .route("/steps/:id/complete", post(steps::complete))
        .route("/steps/:id/retry", post(steps::retry))
        .route("/ws", get(ws::upgrade))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
}

pub async fn serve(ctx: Arc<ServerContext>) -> anyhow::Result<()> {
    let addr = format!("{}:{}", ctx.config.bind, ctx.config.port);
    let router = build_router(ctx);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "fleetd listening");
    axum::serve(listener, router).await?;
    Ok(())
}
