//! `POST /auth`. Token minting is a thin shell (spec's Non-goals): the
//! server holds one shared secret and a caller who presents it gets a
//! session token back, which for this process is the secret itself.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::domain::errors::DomainError;
use crate::http::errors::AppResult;
use crate::http::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AuthRequest {
    pub secret: String,
    pub uid: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub uid: String,
}

pub async fn authenticate(State(state): State<AppState>, Json(req): Json<AuthRequest>) -> AppResult<Json<AuthResponse>> {
    if req.secret.is_empty() {
        return Err(DomainError::ValidationFailure("secret must not be empty".to_string()).into());
    }
    if req.secret != state.ctx.config.auth.shared_secret {
        return Err(DomainError::ValidationFailure("invalid credentials".to_string()).into());
    }
    let uid = req.uid.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    Ok(Json(AuthResponse { token: req.secret, uid }))
}
