use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use serde::Serialize;

use crate::state::{AppState, TaskMetrics};

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    conversations: usize,
    tasks: TaskMetrics,
}

pub fn health_router() -> Router<AppState> {
    Router::new()
        .route("/live", get(live))
        .route("/ready", get(ready))
}

async fn live(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(build_response("ok", &state))
}

async fn ready(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let response = build_response("ok", &state);
    if response.tasks.available_permits == 0 {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "degraded",
                ..response
            }),
        );
    }

    (StatusCode::OK, Json(response))
}

fn build_response(status: &'static str, state: &AppState) -> HealthResponse {
    HealthResponse {
        status,
        conversations: state.conversations().len(),
        tasks: state.task_service().metrics(),
    }
}
