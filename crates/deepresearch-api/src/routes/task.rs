use axum::{
    Json, Router,
    extract::Path,
    http::StatusCode,
    response::sse::{KeepAlive, Sse},
    routing::{get, post},
};
use deepresearch_core::DeepResearchArgs;
use serde::Serialize;
use tracing::instrument;

use super::{GuardedState, registry_for};
use crate::error::AppError;
use crate::state::{AppState, SseStream, TaskMetrics, TaskState, TaskStatus};

#[derive(Debug, Serialize)]
pub struct StartTaskResponse {
    pub task_id: String,
    pub conversation_id: String,
    pub state: TaskState,
    pub capacity: TaskMetrics,
}

pub fn task_router() -> Router<AppState> {
    Router::new()
        .route("/conversations/:id/tasks", post(start_task))
        .route("/tasks/:task_id", get(get_task))
        .route("/tasks/:task_id/stream", get(stream_task))
}

#[instrument(skip_all, fields(conversation_id = %id))]
async fn start_task(
    GuardedState(state): GuardedState,
    Path(id): Path<String>,
    Json(args): Json<DeepResearchArgs>,
) -> Result<(StatusCode, Json<StartTaskResponse>), AppError> {
    if args.query.trim().is_empty() {
        return Err(AppError::BadRequest("query must not be empty".into()));
    }
    let registry = registry_for(&state, &id)?;

    let service = state.task_service();
    let task_id = service.start_task(state.tools().clone(), id.clone(), registry, args);

    let response = StartTaskResponse {
        task_id,
        conversation_id: id,
        state: TaskState::Working,
        capacity: service.metrics(),
    };
    Ok((StatusCode::ACCEPTED, Json(response)))
}

async fn get_task(
    GuardedState(state): GuardedState,
    Path(task_id): Path<String>,
) -> Result<Json<TaskStatus>, AppError> {
    state
        .task_service()
        .status(&task_id)
        .map(Json)
        .ok_or(AppError::TaskNotFound(task_id))
}

async fn stream_task(
    GuardedState(state): GuardedState,
    Path(task_id): Path<String>,
) -> Result<Sse<SseStream>, AppError> {
    match state.task_service().event_stream(&task_id) {
        Some(stream) => Ok(Sse::new(stream).keep_alive(KeepAlive::new())),
        None => Err(AppError::TaskNotFound(task_id)),
    }
}
