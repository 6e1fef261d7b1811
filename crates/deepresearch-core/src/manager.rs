//! Research job lifecycle: validate a resume handle, submit, poll to a
//! terminal state and record first-time completions in the conversation's
//! session registry.
//!
//! Two invocations resuming the same interaction id at once are not
//! serialised here; the provider's own semantics for continuing an
//! interaction apply.

use std::time::Duration;

use serde::Serialize;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::client::{CreateJob, DynJobClient, Job, JobStatus};
use crate::config::{Config, PollingConfig};
use crate::logging::{AuditLog, ResearchLogInput};
use crate::registry::{SessionRegistry, Sessions, session_label};
use crate::{ResearchError, StateError};

/// Report text used when a completed job has no outputs, or when its last
/// output carries no `text` (non-text outputs are not rendered).
pub const NO_OUTPUT: &str = "No output.";

/// Deadline used when the configured budget does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingPolicy {
    /// Total wait budget measured from submission.
    pub timeout: Duration,
    pub interval: Duration,
}

impl Default for PollingPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            interval: Duration::from_secs(10),
        }
    }
}

impl From<&PollingConfig> for PollingPolicy {
    fn from(config: &PollingConfig) -> Self {
        Self {
            timeout: config.timeout(),
            interval: config.interval(),
        }
    }
}

/// Successful research run.
#[derive(Debug, Clone, PartialEq)]
pub struct ResearchOutcome {
    pub report: String,
    pub job_id: String,
    pub resumed: bool,
    /// Registry snapshot taken after finalisation.
    pub sessions: Sessions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClearOutcome {
    pub found: bool,
}

#[derive(Clone)]
pub struct ResearchJobManager {
    client: DynJobClient,
    agent: String,
    policy: PollingPolicy,
    audit: Option<AuditLog>,
}

impl ResearchJobManager {
    pub fn new(client: DynJobClient, agent: impl Into<String>) -> Self {
        Self {
            client,
            agent: agent.into(),
            policy: PollingPolicy::default(),
            audit: None,
        }
    }

    /// Manager configured from the loaded provider, polling and logging sections.
    pub fn from_config(client: DynJobClient, config: &Config) -> Self {
        let manager = Self::new(client, config.provider.agent.clone())
            .with_policy(PollingPolicy::from(&config.polling));
        match &config.logging.audit_dir {
            Some(dir) => {
                manager.with_audit_log(AuditLog::new(dir, config.logging.retention_days))
            }
            None => manager,
        }
    }

    pub fn with_policy(mut self, policy: PollingPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_audit_log(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn client(&self) -> &DynJobClient {
        &self.client
    }

    /// Start a new research thread, or continue `resume_id` when given.
    pub async fn run_research(
        &self,
        registry: &SessionRegistry,
        query: &str,
        resume_id: Option<&str>,
    ) -> Result<ResearchOutcome, ResearchError> {
        self.run_research_until_cancelled(registry, query, resume_id, &CancellationToken::new())
            .await
    }

    /// Like [`run_research`](Self::run_research), but stops polling once
    /// `cancel` fires. A cancelled run leaves the registry untouched.
    #[instrument(
        name = "research.run",
        skip(self, registry, query, cancel),
        fields(resume_id = ?resume_id, query_chars = query.chars().count())
    )]
    pub async fn run_research_until_cancelled(
        &self,
        registry: &SessionRegistry,
        query: &str,
        resume_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ResearchOutcome, ResearchError> {
        let previous = match resume_id {
            Some(id) => {
                let Some(label) = registry.get(id).await? else {
                    warn!(interaction_id = %id, "resume handle not found in registry");
                    return Err(ResearchError::UnknownSession(id.to_string()));
                };
                info!(interaction_id = %id, %label, "resuming research thread");
                Some(id.to_string())
            }
            None => {
                info!("starting new research thread");
                None
            }
        };
        let resumed = previous.is_some();

        let request = CreateJob::new(&self.agent, query).continuing(previous);
        let submitted = self.client.create(request).await.inspect_err(|err| {
            warn!(error = %err, "provider rejected research job");
        })?;
        info!(job_id = %submitted.id, "research job submitted; polling");

        let job = self.poll_until_terminal(&submitted.id, cancel).await?;

        if !resumed {
            registry.put(&submitted.id, session_label(query)).await?;
            debug!(job_id = %submitted.id, "recorded new research session");
        }

        let report = job.report_text().unwrap_or(NO_OUTPUT).to_string();
        self.audit_completion(ResearchLogInput {
            interaction_id: submitted.id.clone(),
            query: query.to_string(),
            resumed,
            report_chars: report.chars().count(),
        })
        .await;

        let sessions = registry.list().await?;
        info!(
            job_id = %submitted.id,
            report_chars = report.len(),
            active_sessions = sessions.len(),
            "research job completed"
        );

        Ok(ResearchOutcome {
            report,
            job_id: submitted.id,
            resumed,
            sessions,
        })
    }

    async fn poll_until_terminal(
        &self,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Job, ResearchError> {
        let started = Instant::now();
        let deadline = started
            .checked_add(self.policy.timeout)
            .unwrap_or_else(|| started + FAR_FUTURE);
        let cancelled = || ResearchError::Cancelled {
            job_id: job_id.to_string(),
        };

        let mut attempt = 0u64;
        loop {
            attempt += 1;
            let job = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled()),
                job = self.client.get(job_id) => job?,
            };

            match &job.status {
                JobStatus::Completed => return Ok(job),
                JobStatus::Failed | JobStatus::Cancelled => {
                    warn!(job_id, status = %job.status, attempt, "research job ended without success");
                    return Err(ResearchError::ResearchFailed {
                        job_id: job_id.to_string(),
                        status: job.status.to_string(),
                    });
                }
                status => debug!(job_id, %status, attempt, "research job still running"),
            }

            let now = Instant::now();
            if now >= deadline {
                let elapsed = now - started;
                warn!(
                    job_id,
                    elapsed_secs = elapsed.as_secs(),
                    "research job timed out; leaving it running on the provider"
                );
                return Err(ResearchError::Timeout {
                    job_id: job_id.to_string(),
                    elapsed,
                });
            }

            // The last sleep is clamped so the final poll lands on the deadline.
            let wake = now
                .checked_add(self.policy.interval)
                .map_or(deadline, |next| next.min(deadline));
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled()),
                _ = sleep_until(wake) => {}
            }
        }
    }

    async fn audit_completion(&self, input: ResearchLogInput) {
        let Some(audit) = self.audit.clone() else {
            return;
        };
        match tokio::task::spawn_blocking(move || audit.record_completion(input)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "failed to write research audit log"),
            Err(err) => warn!(error = %err, "research audit task panicked"),
        }
    }

    async fn audit_forget(&self, interaction_ids: Vec<String>) {
        let Some(audit) = self.audit.clone() else {
            return;
        };
        match tokio::task::spawn_blocking(move || audit.remove_interactions(&interaction_ids)).await
        {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "failed to prune research audit log"),
            Err(err) => warn!(error = %err, "research audit task panicked"),
        }
    }

    pub async fn list_sessions(&self, registry: &SessionRegistry) -> Result<Sessions, StateError> {
        registry.list().await
    }

    /// Absence is reported through `found`, not as an error.
    #[instrument(name = "research.clear", skip(self, registry))]
    pub async fn clear_session(
        &self,
        registry: &SessionRegistry,
        interaction_id: &str,
    ) -> Result<ClearOutcome, StateError> {
        let found = registry.remove(interaction_id).await?;
        if found {
            info!("cleared research session");
            self.audit_forget(vec![interaction_id.to_string()]).await;
        } else {
            debug!("no research session to clear");
        }
        Ok(ClearOutcome { found })
    }

    /// Returns how many sessions were removed.
    #[instrument(name = "research.clear_all", skip(self, registry))]
    pub async fn clear_all_sessions(&self, registry: &SessionRegistry) -> Result<usize, StateError> {
        let removed = registry.clear().await?;
        info!(count = removed.len(), "cleared all research sessions");
        let count = removed.len();
        self.audit_forget(removed).await;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::StubJobClient;
    use std::sync::Arc;

    fn manager_with(client: Arc<StubJobClient>) -> ResearchJobManager {
        ResearchJobManager::new(client, "deep-research-test")
    }

    #[tokio::test(start_paused = true)]
    async fn polls_at_fixed_interval_until_completion() {
        let client = Arc::new(
            StubJobClient::new()
                .with_job_ids(["J1"])
                .with_polls_before_terminal(3)
                .with_report(Some("report")),
        );
        let manager = manager_with(client.clone());
        let registry = SessionRegistry::in_memory();

        let started = Instant::now();
        let outcome = manager.run_research(&registry, "topic", None).await.unwrap();

        assert_eq!(outcome.report, "report");
        assert_eq!(client.get_calls(), 4);
        assert_eq!(started.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn final_poll_is_clamped_to_deadline() {
        let client = Arc::new(StubJobClient::new().with_job_ids(["J1"]).never_finishing());
        let manager = manager_with(client.clone()).with_policy(PollingPolicy {
            timeout: Duration::from_secs(25),
            interval: Duration::from_secs(10),
        });
        let registry = SessionRegistry::in_memory();

        let started = Instant::now();
        let err = manager
            .run_research(&registry, "topic", None)
            .await
            .unwrap_err();

        // polls at 0s, 10s, 20s and 25s
        assert_eq!(client.get_calls(), 4);
        assert_eq!(started.elapsed(), Duration::from_secs(25));
        assert!(matches!(err, ResearchError::Timeout { ref job_id, .. } if job_id == "J1"));
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_budget_keeps_polling_instead_of_overflowing() {
        let client = Arc::new(StubJobClient::new().with_job_ids(["J1"]).never_finishing());
        let mut config = Config::default();
        config.polling.timeout_secs = u64::MAX;
        let manager = ResearchJobManager::from_config(client.clone(), &config);
        let registry = SessionRegistry::in_memory();
        let cancel = CancellationToken::new();

        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                manager
                    .run_research_until_cancelled(&registry, "topic", None, &cancel)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_secs(25)).await;
        cancel.cancel();
        let err = task.await.unwrap().unwrap_err();

        assert!(matches!(err, ResearchError::Cancelled { .. }));
        assert_eq!(client.get_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_interval_lands_on_the_deadline() {
        let client = Arc::new(StubJobClient::new().never_finishing());
        let manager = manager_with(client.clone()).with_policy(PollingPolicy {
            timeout: Duration::from_secs(20),
            interval: Duration::MAX,
        });
        let registry = SessionRegistry::in_memory();

        let err = manager
            .run_research(&registry, "topic", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ResearchError::Timeout { elapsed, .. } if elapsed == Duration::from_secs(20)));
        assert_eq!(client.get_calls(), 2);
    }

    #[tokio::test]
    async fn get_failure_is_a_provider_error_without_mutation() {
        let client = Arc::new(StubJobClient::new().failing_get("backend unavailable"));
        let manager = manager_with(client);
        let registry = SessionRegistry::in_memory();

        let err = manager
            .run_research(&registry, "topic", None)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "backend unavailable");
        assert!(registry.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn completion_without_text_uses_placeholder() {
        let client = Arc::new(StubJobClient::new().with_report(None));
        let manager = manager_with(client);
        let registry = SessionRegistry::in_memory();

        let outcome = manager.run_research(&registry, "topic", None).await.unwrap();
        assert_eq!(outcome.report, NO_OUTPUT);
    }

    #[tokio::test]
    async fn audit_log_follows_session_lifecycle() {
        let temp = tempfile::TempDir::new().expect("temp dir");
        let client = Arc::new(StubJobClient::new().with_job_ids(["J1"]));
        let manager = manager_with(client).with_audit_log(AuditLog::new(temp.path(), 0));
        let registry = SessionRegistry::in_memory();

        manager.run_research(&registry, "topic", None).await.unwrap();
        assert!(temp.path().read_dir().unwrap().next().is_some());

        let outcome = manager.clear_session(&registry, "J1").await.unwrap();
        assert!(outcome.found);
        assert!(temp.path().read_dir().unwrap().next().is_none());
    }
}
