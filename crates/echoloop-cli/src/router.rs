//! HTTP router construction.

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use crate::api;
use crate::state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route("/api/state", get(api::queue_state))
        .route("/api/tasks/{id}", get(api::task_status))
        .route("/api/control", post(api::control))
        .with_state(state)
}
