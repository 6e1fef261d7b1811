use std::{path::PathBuf, time::Duration};

use thiserror::Error;

/// Core error type for DeepResearch configuration and setup.
#[derive(Debug, Error)]
pub enum DeepResearchError {
    #[error("configuration error: {0}")]
    InvalidConfiguration(String),
    #[error("missing environment variable: {0}")]
    MissingSecret(String),
    #[error("I/O error while reading {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DeepResearchError {
    pub fn config_io(path: PathBuf, source: std::io::Error) -> Self {
        Self::ConfigIo { path, source }
    }
}

/// Failure reported by the external research provider.
///
/// The display text is passed through to callers verbatim.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{0}")]
    Transport(String),
    #[error("{message}")]
    Rejected { status: u16, message: String },
    #[error("unexpected provider response: {0}")]
    Decode(String),
    #[error("provider credentials missing: {0}")]
    MissingCredentials(String),
}

impl ProviderError {
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }
}

/// Failure while loading or storing conversation state.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("state I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("state value under `{key}` is corrupt: {reason}")]
    Corrupt { key: String, reason: String },
}

impl StateError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn corrupt(key: impl Into<String>, reason: impl ToString) -> Self {
        Self::Corrupt {
            key: key.into(),
            reason: reason.to_string(),
        }
    }
}

/// Terminal outcome of a research invocation that did not succeed.
///
/// None of these are retried; the caller must start a new invocation.
#[derive(Debug, Error)]
pub enum ResearchError {
    #[error("Interaction ID {0} not found in history.")]
    UnknownSession(String),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("Research failed: {status}")]
    ResearchFailed { job_id: String, status: String },
    #[error(
        "Research timed out after {}s; interaction {job_id} is still running on the provider.",
        .elapsed.as_secs()
    )]
    Timeout { job_id: String, elapsed: Duration },
    #[error("Research polling cancelled; outcome of interaction {job_id} is unknown.")]
    Cancelled { job_id: String },
    #[error(transparent)]
    State(#[from] StateError),
}

impl ResearchError {
    /// Short machine-readable kind, used in logs and task events.
    pub fn kind(&self) -> &'static str {
        match self {
            ResearchError::UnknownSession(_) => "not_found",
            ResearchError::Provider(_) => "provider",
            ResearchError::ResearchFailed { .. } => "research_failed",
            ResearchError::Timeout { .. } => "timeout",
            ResearchError::Cancelled { .. } => "cancelled",
            ResearchError::State(_) => "state",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_session_message_names_the_id() {
        let err = ResearchError::UnknownSession("J9".into());
        assert_eq!(err.to_string(), "Interaction ID J9 not found in history.");
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn provider_message_passes_through() {
        let err: ResearchError = ProviderError::rejected(403, "API key not valid").into();
        assert_eq!(err.to_string(), "API key not valid");
    }

    #[test]
    fn timeout_reports_whole_seconds() {
        let err = ResearchError::Timeout {
            job_id: "J1".into(),
            elapsed: Duration::from_millis(600_400),
        };
        assert!(err.to_string().starts_with("Research timed out after 600s"));
    }
}
