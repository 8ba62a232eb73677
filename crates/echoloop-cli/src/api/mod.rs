//! JSON endpoints over the queue: health, state, task lookup and the
//! control endpoint (queue start/stop, echo loop pause/resume).

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use echoloop_core::{QueueStats, TaskId, TaskSnapshot};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub queue_running: bool,
    pub loop_enabled: bool,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        queue_running: state.queue.is_running(),
        loop_enabled: state.loop_enabled,
    })
}

#[derive(Serialize)]
pub struct StateResponse {
    pub stats: QueueStats,
    pub tasks: BTreeMap<TaskId, TaskSnapshot>,
}

pub async fn queue_state(State(state): State<Arc<AppState>>) -> Json<StateResponse> {
    Json(StateResponse {
        stats: state.queue.get_queue_stats().await,
        tasks: state.queue.get_all_tasks().await,
    })
}

/// Snapshot of one task, or 404 `{"status":"not_found"}`.
pub async fn task_status(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.queue.get_task_status(&TaskId::new(id)).await {
        Some(snapshot) => Json(snapshot).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({ "status": "not_found" }))).into_response(),
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlCommand {
    Start,
    Stop,
    Pause,
    Resume,
    Status,
}

#[derive(Debug, Deserialize)]
pub struct ControlRequest {
    pub command: ControlCommand,
}

#[derive(Serialize)]
pub struct ControlResponse {
    pub status: &'static str,
    pub running: bool,
    pub paused: bool,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub async fn control(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ControlRequest>,
) -> Result<Json<ControlResponse>, (StatusCode, Json<ErrorResponse>)> {
    let status = match request.command {
        ControlCommand::Start => {
            state.queue.start().await.map_err(|e| {
                warn!(error = %e, "start requested but failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse {
                        error: e.to_string(),
                    }),
                )
            })?;
            "started"
        }
        ControlCommand::Stop => {
            state.queue.stop().await;
            "stopped"
        }
        // send_replace: the flag is kept even with no loop subscribed.
        ControlCommand::Pause => {
            state.pause.send_replace(true);
            "paused"
        }
        ControlCommand::Resume => {
            state.pause.send_replace(false);
            "resumed"
        }
        ControlCommand::Status => {
            if state.is_paused() {
                "paused"
            } else if state.queue.is_running() {
                "running"
            } else {
                "stopped"
            }
        }
    };
    info!(command = ?request.command, "control command applied");
    Ok(Json(ControlResponse {
        status,
        running: state.queue.is_running(),
        paused: state.is_paused(),
    }))
}
