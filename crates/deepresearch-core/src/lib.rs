//! DeepResearch session-keyed research job lifecycle.
//!
//! Submits research jobs to an external long-running provider, polls them to
//! completion without blocking the runtime, and keeps a per-conversation
//! registry of resumable research threads.

pub mod client;
mod config;
mod error;
mod interactions;
mod logging;
mod manager;
mod provider;
mod registry;
mod security;
pub mod state;
mod telemetry;
pub mod tools;

pub use client::{CreateJob, DynJobClient, Job, JobClient, JobOutput, JobStatus, StubJobClient};
pub use config::{Config, ConfigLoader, LoggingConfig, PollingConfig, ProviderConfig};
pub use error::{DeepResearchError, ProviderError, ResearchError, StateError};
pub use interactions::InteractionsClient;
pub use logging::{AuditLog, ResearchLogInput};
pub use manager::{ClearOutcome, NO_OUTPUT, PollingPolicy, ResearchJobManager, ResearchOutcome};
pub use provider::ProviderChoice;
pub use registry::{REGISTRY_KEY, SessionRegistry, Sessions, session_label};
pub use security::{SecretValue, require_env};
pub use state::{DynStateStore, InMemoryStateStore, JsonFileStateStore, StateStore};
pub use telemetry::{TelemetryOptions, init_telemetry};
pub use tools::{
    ClearSessionArgs, DeepResearchArgs, ResearchTools, ToolDeclaration, ToolResponse, ToolStatus,
};
