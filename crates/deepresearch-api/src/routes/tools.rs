use axum::{
    Json, Router,
    extract::Path,
    routing::{get, post},
};
use deepresearch_core::{ResearchTools, ToolDeclaration, ToolResponse};
use serde_json::Value;
use tracing::instrument;

use super::{GuardedState, registry_for};
use crate::error::AppError;
use crate::state::AppState;

pub fn tools_router() -> Router<AppState> {
    Router::new()
        .route("/tools", get(list_tools))
        .route("/conversations/:id/tools/:name", post(invoke_tool))
}

async fn list_tools(GuardedState(_state): GuardedState) -> Json<Vec<ToolDeclaration>> {
    Json(ResearchTools::declarations())
}

/// Tool call as emitted by the model. The result is returned verbatim with
/// 200; callers read the outcome from its `status` field.
#[instrument(skip_all, fields(conversation_id = %id, tool = %name))]
async fn invoke_tool(
    GuardedState(state): GuardedState,
    Path((id, name)): Path<(String, String)>,
    body: Option<Json<Value>>,
) -> Result<Json<ToolResponse>, AppError> {
    let registry = registry_for(&state, &id)?;
    let args = body.map(|Json(args)| args).unwrap_or(Value::Null);
    let cancel = state.task_service().shutdown_token();

    let response = state
        .tools()
        .dispatch(&registry, &name, args, &cancel)
        .await;
    Ok(Json(response))
}
