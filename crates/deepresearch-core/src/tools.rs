//! Tool surface handed to the conversational agent loop.
//!
//! Every call returns a well-formed [`ToolResponse`]; failures are reported as
//! `{"status": "error", "message": ...}` and never escape to the caller.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::manager::{ResearchJobManager, ResearchOutcome};
use crate::registry::{SessionRegistry, Sessions};

pub const DEEP_RESEARCH: &str = "deep_research";
pub const LIST_RESEARCH_SESSIONS: &str = "list_research_sessions";
pub const CLEAR_RESEARCH_SESSION: &str = "clear_research_session";
pub const CLEAR_ALL_RESEARCH_SESSIONS: &str = "clear_all_research_sessions";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Success,
    NotFound,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub status: ToolStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_interaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_sessions: Option<Sessions>,
}

impl ToolResponse {
    fn bare(status: ToolStatus) -> Self {
        Self {
            status,
            report: None,
            message: None,
            current_interaction_id: None,
            active_sessions: None,
        }
    }

    pub fn error(message: impl ToString) -> Self {
        Self::message(ToolStatus::Error, message)
    }

    pub fn message(status: ToolStatus, message: impl ToString) -> Self {
        Self {
            message: Some(message.to_string()),
            ..Self::bare(status)
        }
    }

    pub fn sessions(sessions: Sessions) -> Self {
        Self {
            active_sessions: Some(sessions),
            ..Self::bare(ToolStatus::Success)
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ToolStatus::Success
    }
}

impl From<ResearchOutcome> for ToolResponse {
    fn from(outcome: ResearchOutcome) -> Self {
        Self {
            report: Some(outcome.report),
            current_interaction_id: Some(outcome.job_id),
            active_sessions: Some(outcome.sessions),
            ..Self::bare(ToolStatus::Success)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeepResearchArgs {
    pub query: String,
    #[serde(default)]
    pub interaction_id: Option<String>,
}

impl DeepResearchArgs {
    pub fn new(query: impl Into<String>, interaction_id: Option<String>) -> Self {
        Self {
            query: query.into(),
            interaction_id,
        }
    }

    /// An empty id means "start a new thread", as agents often send `""`.
    /// Anything else must match a registry key exactly.
    fn resume_id(&self) -> Option<&str> {
        self.interaction_id.as_deref().filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClearSessionArgs {
    pub interaction_id: String,
}

/// Function declaration advertised to the model.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDeclaration {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

#[derive(Clone)]
pub struct ResearchTools {
    manager: ResearchJobManager,
}

impl ResearchTools {
    pub fn new(manager: ResearchJobManager) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &ResearchJobManager {
        &self.manager
    }

    pub async fn deep_research(
        &self,
        registry: &SessionRegistry,
        args: DeepResearchArgs,
    ) -> ToolResponse {
        self.deep_research_until_cancelled(registry, args, &CancellationToken::new())
            .await
    }

    pub async fn deep_research_until_cancelled(
        &self,
        registry: &SessionRegistry,
        args: DeepResearchArgs,
        cancel: &CancellationToken,
    ) -> ToolResponse {
        match self
            .manager
            .run_research_until_cancelled(registry, &args.query, args.resume_id(), cancel)
            .await
        {
            Ok(outcome) => outcome.into(),
            Err(err) => {
                warn!(kind = err.kind(), error = %err, "deep_research failed");
                ToolResponse::error(err)
            }
        }
    }

    pub async fn list_research_sessions(&self, registry: &SessionRegistry) -> ToolResponse {
        match self.manager.list_sessions(registry).await {
            Ok(sessions) => ToolResponse::sessions(sessions),
            Err(err) => {
                error!(error = %err, "failed to read research sessions");
                ToolResponse::error(err)
            }
        }
    }

    pub async fn clear_research_session(
        &self,
        registry: &SessionRegistry,
        interaction_id: &str,
    ) -> ToolResponse {
        match self.manager.clear_session(registry, interaction_id).await {
            Ok(outcome) if outcome.found => ToolResponse::message(
                ToolStatus::Success,
                format!("Research session {interaction_id} cleared."),
            ),
            Ok(_) => ToolResponse::message(
                ToolStatus::NotFound,
                format!("Interaction ID {interaction_id} not found in history."),
            ),
            Err(err) => {
                error!(error = %err, "failed to clear research session");
                ToolResponse::error(err)
            }
        }
    }

    pub async fn clear_all_research_sessions(&self, registry: &SessionRegistry) -> ToolResponse {
        match self.manager.clear_all_sessions(registry).await {
            Ok(count) => ToolResponse::message(
                ToolStatus::Success,
                format!("Cleared {count} research session(s)."),
            ),
            Err(err) => {
                error!(error = %err, "failed to clear research sessions");
                ToolResponse::error(err)
            }
        }
    }

    /// Invoke a tool by name with JSON arguments, as emitted by the model.
    pub async fn dispatch(
        &self,
        registry: &SessionRegistry,
        name: &str,
        args: Value,
        cancel: &CancellationToken,
    ) -> ToolResponse {
        match name {
            DEEP_RESEARCH => match parse_args::<DeepResearchArgs>(name, args) {
                Ok(args) => {
                    self.deep_research_until_cancelled(registry, args, cancel)
                        .await
                }
                Err(response) => response,
            },
            LIST_RESEARCH_SESSIONS => self.list_research_sessions(registry).await,
            CLEAR_RESEARCH_SESSION => match parse_args::<ClearSessionArgs>(name, args) {
                Ok(args) => {
                    self.clear_research_session(registry, &args.interaction_id)
                        .await
                }
                Err(response) => response,
            },
            CLEAR_ALL_RESEARCH_SESSIONS => self.clear_all_research_sessions(registry).await,
            other => ToolResponse::error(format!("Unknown tool: {other}")),
        }
    }

    pub fn declarations() -> Vec<ToolDeclaration> {
        vec![
            ToolDeclaration {
                name: DEEP_RESEARCH,
                description: "Performs deep research. Pass interaction_id to continue an existing research thread; omit it to start a new one. Returns the report and the active research sessions.",
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "The research topic or question."
                        },
                        "interaction_id": {
                            "type": "string",
                            "description": "ID of a previous interaction to resume, taken from active_sessions."
                        }
                    },
                    "required": ["query"]
                }),
            },
            ToolDeclaration {
                name: LIST_RESEARCH_SESSIONS,
                description: "Lists the research threads that can be resumed, keyed by interaction_id.",
                parameters: json!({"type": "object", "properties": {}}),
            },
            ToolDeclaration {
                name: CLEAR_RESEARCH_SESSION,
                description: "Forgets one research thread so it can no longer be resumed.",
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "interaction_id": {
                            "type": "string",
                            "description": "ID of the research thread to forget."
                        }
                    },
                    "required": ["interaction_id"]
                }),
            },
            ToolDeclaration {
                name: CLEAR_ALL_RESEARCH_SESSIONS,
                description: "Forgets every research thread of this conversation.",
                parameters: json!({"type": "object", "properties": {}}),
            },
        ]
    }
}

fn parse_args<T: for<'de> Deserialize<'de>>(tool: &str, args: Value) -> Result<T, ToolResponse> {
    // Tools without arguments may be invoked with `null`.
    let args = if args.is_null() { json!({}) } else { args };
    serde_json::from_value(args)
        .map_err(|err| ToolResponse::error(format!("Invalid arguments for {tool}: {err}")))
}
