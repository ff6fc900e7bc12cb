//! Shared application state handed to every handler via axum's `State` extractor.

use std::sync::Arc;

use crate::services::ServerContext;

#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<ServerContext>,
}

impl AppState {
    pub fn new(ctx: Arc<ServerContext>) -> Self {
        Self { ctx }
    }
}
