mod conversation;
mod health;
mod task;
mod tools;

use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::FromRequestParts,
    http::{StatusCode, header, request::Parts},
};
use deepresearch_core::{SessionRegistry, ToolResponse, ToolStatus};

use crate::error::AppError;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .merge(tools::tools_router())
        .merge(conversation::conversation_router())
        .merge(task::task_router());

    Router::new()
        .nest("/health", health::health_router())
        .nest("/api", api)
        .with_state(state)
}

/// Extractor that enforces the optional bearer token on `/api` routes.
pub struct GuardedState(pub AppState);

#[async_trait]
impl FromRequestParts<AppState> for GuardedState {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let app_state = state.clone();

        if let Some(expected) = app_state.auth_token() {
            let provided = parts
                .headers
                .get(header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.strip_prefix("Bearer "))
                .map(str::trim);

            match provided {
                Some(token) if token == expected.as_str() => {}
                _ => return Err(AppError::Unauthorized),
            }
        }

        Ok(GuardedState(app_state))
    }
}

fn registry_for(state: &AppState, conversation_id: &str) -> Result<SessionRegistry, AppError> {
    state
        .conversations()
        .get(conversation_id)
        .ok_or_else(|| AppError::ConversationNotFound(conversation_id.to_string()))
}

/// REST view of a tool result: the tool status decides the HTTP status.
fn tool_reply(response: ToolResponse) -> (StatusCode, Json<ToolResponse>) {
    let status = match response.status {
        ToolStatus::Success => StatusCode::OK,
        ToolStatus::NotFound => StatusCode::NOT_FOUND,
        ToolStatus::Error => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(response))
}
