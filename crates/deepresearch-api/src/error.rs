use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use deepresearch_core::StateError;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Request failures that never reach a tool. Tool outcomes travel as
/// `ToolResponse` bodies instead.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid auth token")]
    Unauthorized,
    #[error("{0}")]
    BadRequest(String),
    #[error("conversation {0} not found")]
    ConversationNotFound(String),
    #[error("task {0} not found")]
    TaskNotFound(String),
    #[error("conversation state unavailable: {0}")]
    State(#[from] StateError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::ConversationNotFound(_) | AppError::TaskNotFound(_) => StatusCode::NOT_FOUND,
            AppError::State(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable kind, next to the human message.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Unauthorized => "unauthorized",
            AppError::BadRequest(_) => "bad_request",
            AppError::ConversationNotFound(_) => "conversation_not_found",
            AppError::TaskNotFound(_) => "task_not_found",
            AppError::State(_) => "state_error",
            AppError::Internal(_) => "internal",
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(code = self.code(), error = %self, "request failed");
        }
        let body = ErrorBody {
            error: self.to_string(),
            code: self.code(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use serde_json::{Value, json};
    use std::path::PathBuf;

    async fn render(err: AppError) -> (StatusCode, Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        (status, serde_json::from_slice(&bytes).expect("json body"))
    }

    #[tokio::test]
    async fn lookups_render_as_not_found_with_kind() {
        let (status, body) = render(AppError::ConversationNotFound("c1".into())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(
            body,
            json!({"error": "conversation c1 not found", "code": "conversation_not_found"})
        );

        let (status, body) = render(AppError::TaskNotFound("t1".into())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "task_not_found");
    }

    #[tokio::test]
    async fn state_failures_are_server_errors() {
        let err = StateError::io(
            PathBuf::from("/state/c1.json"),
            std::io::Error::other("disk full"),
        );
        let (status, body) = render(err.into()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["code"], "state_error");
        assert!(body["error"].as_str().unwrap().contains("disk full"));
    }

    #[test]
    fn rejections_map_to_client_errors() {
        assert_eq!(AppError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AppError::BadRequest("query must not be empty".into()).status(),
            StatusCode::BAD_REQUEST
        );
    }
}
