use axum::{
    Json, Router,
    extract::Path,
    http::StatusCode,
    routing::{delete, post},
};
use deepresearch_core::ToolResponse;
use serde::Serialize;

use super::{GuardedState, registry_for, tool_reply};
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct CreateConversationResponse {
    pub conversation_id: String,
}

pub fn conversation_router() -> Router<AppState> {
    Router::new()
        .route("/conversations", post(create_conversation))
        .route(
            "/conversations/:id/sessions",
            delete(clear_all_sessions).get(list_sessions),
        )
        .route(
            "/conversations/:id/sessions/:interaction",
            delete(clear_session),
        )
}

async fn create_conversation(
    GuardedState(state): GuardedState,
) -> Result<(StatusCode, Json<CreateConversationResponse>), AppError> {
    let conversation_id = state.conversations().create().await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateConversationResponse { conversation_id }),
    ))
}

async fn list_sessions(
    GuardedState(state): GuardedState,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<ToolResponse>), AppError> {
    let registry = registry_for(&state, &id)?;
    Ok(tool_reply(state.tools().list_research_sessions(&registry).await))
}

async fn clear_session(
    GuardedState(state): GuardedState,
    Path((id, interaction)): Path<(String, String)>,
) -> Result<(StatusCode, Json<ToolResponse>), AppError> {
    let registry = registry_for(&state, &id)?;
    Ok(tool_reply(
        state
            .tools()
            .clear_research_session(&registry, &interaction)
            .await,
    ))
}

async fn clear_all_sessions(
    GuardedState(state): GuardedState,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<ToolResponse>), AppError> {
    let registry = registry_for(&state, &id)?;
    Ok(tool_reply(
        state.tools().clear_all_research_sessions(&registry).await,
    ))
}
