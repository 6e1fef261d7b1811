//! Provider-facing job abstraction.
//!
//! A job is one research interaction hosted by the external provider. The
//! manager only ever sees the tagged [`Job`] type; how it is fetched is up to
//! the [`JobClient`] implementation.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::ProviderError;

/// Lifecycle status reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobStatus {
    InProgress,
    RequiresAction,
    Completed,
    Failed,
    Cancelled,
    /// Status string this client does not recognise; treated as running.
    Unknown(String),
}

impl JobStatus {
    pub fn as_str(&self) -> &str {
        match self {
            JobStatus::InProgress => "in_progress",
            JobStatus::RequiresAction => "requires_action",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Unknown(raw) => raw,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl From<String> for JobStatus {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "in_progress" | "running" | "pending" => JobStatus::InProgress,
            "requires_action" => JobStatus::RequiresAction,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            "cancelled" | "canceled" => JobStatus::Cancelled,
            _ => JobStatus::Unknown(value),
        }
    }
}

impl From<JobStatus> for String {
    fn from(value: JobStatus) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutput {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl JobOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: Some("text".to_string()),
            text: Some(text.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    /// Populated by the provider only once the job completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Vec<JobOutput>>,
}

impl Job {
    pub fn new(id: impl Into<String>, status: JobStatus) -> Self {
        Self {
            id: id.into(),
            status,
            outputs: None,
        }
    }

    pub fn with_outputs(mut self, outputs: Vec<JobOutput>) -> Self {
        self.outputs = Some(outputs);
        self
    }

    /// Text of the last output, if the job produced one.
    pub fn report_text(&self) -> Option<&str> {
        self.outputs
            .as_deref()
            .and_then(|outputs| outputs.last())
            .and_then(|last| last.text.as_deref())
    }
}

/// Request to start a job, or to continue one when `previous_interaction_id`
/// is set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateJob {
    pub agent: String,
    pub input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_interaction_id: Option<String>,
    pub background: bool,
}

impl CreateJob {
    pub fn new(agent: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            input: input.into(),
            previous_interaction_id: None,
            background: true,
        }
    }

    pub fn continuing(mut self, previous: Option<String>) -> Self {
        self.previous_interaction_id = previous;
        self
    }
}

#[async_trait]
pub trait JobClient: Send + Sync {
    async fn create(&self, request: CreateJob) -> Result<Job, ProviderError>;

    async fn get(&self, job_id: &str) -> Result<Job, ProviderError>;

    async fn cancel(&self, job_id: &str) -> Result<Job, ProviderError>;
}

pub type DynJobClient = Arc<dyn JobClient>;

/// Scripted offline provider for tests and `--offline` runs.
///
/// Every job reports `in_progress` for a configurable number of polls and then
/// settles on the configured terminal status.
pub struct StubJobClient {
    polls_before_terminal: Option<usize>,
    terminal: JobStatus,
    report: Option<String>,
    create_error: Option<String>,
    get_error: Option<String>,
    ids: Mutex<VecDeque<String>>,
    jobs: DashMap<String, StubJob>,
    requests: Mutex<Vec<CreateJob>>,
    create_calls: AtomicUsize,
    get_calls: AtomicUsize,
    cancel_calls: AtomicUsize,
}

#[derive(Debug, Clone)]
struct StubJob {
    input: String,
    remaining_polls: Option<usize>,
    cancelled: bool,
}

impl Default for StubJobClient {
    fn default() -> Self {
        Self::new()
    }
}

impl StubJobClient {
    pub fn new() -> Self {
        Self {
            polls_before_terminal: Some(0),
            terminal: JobStatus::Completed,
            report: Some(String::new()),
            create_error: None,
            get_error: None,
            ids: Mutex::new(VecDeque::new()),
            jobs: DashMap::new(),
            requests: Mutex::new(Vec::new()),
            create_calls: AtomicUsize::new(0),
            get_calls: AtomicUsize::new(0),
            cancel_calls: AtomicUsize::new(0),
        }
    }

    /// Ids handed out by `create`, in order; random ids once exhausted.
    pub fn with_job_ids<I, S>(self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Ok(mut queue) = self.ids.lock() {
            queue.extend(ids.into_iter().map(Into::into));
        }
        self
    }

    pub fn with_polls_before_terminal(mut self, polls: usize) -> Self {
        self.polls_before_terminal = Some(polls);
        self
    }

    /// Jobs stay `in_progress` forever.
    pub fn never_finishing(mut self) -> Self {
        self.polls_before_terminal = None;
        self
    }

    pub fn with_terminal_status(mut self, status: JobStatus) -> Self {
        self.terminal = status;
        self
    }

    /// Report text of completed jobs. `None` completes without outputs; an
    /// empty string echoes the job input.
    pub fn with_report(mut self, report: Option<&str>) -> Self {
        self.report = report.map(str::to_string);
        self
    }

    pub fn rejecting_create(mut self, message: impl Into<String>) -> Self {
        self.create_error = Some(message.into());
        self
    }

    pub fn failing_get(mut self, message: impl Into<String>) -> Self {
        self.get_error = Some(message.into());
        self
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn cancel_calls(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }

    /// Every create request received so far.
    pub fn requests(&self) -> Vec<CreateJob> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    fn next_id(&self) -> String {
        self.ids
            .lock()
            .ok()
            .and_then(|mut queue| queue.pop_front())
            .unwrap_or_else(|| format!("stub-{}", Uuid::new_v4()))
    }

    fn snapshot(&self, id: &str, job: &StubJob) -> Job {
        if job.cancelled {
            return Job::new(id, JobStatus::Cancelled);
        }
        match job.remaining_polls {
            Some(0) => {}
            _ => return Job::new(id, JobStatus::InProgress),
        }

        let finished = Job::new(id, self.terminal.clone());
        if self.terminal != JobStatus::Completed {
            return finished;
        }
        match self.report.as_deref() {
            None => finished,
            Some("") => finished.with_outputs(vec![JobOutput::text(format!(
                "Stub research report for: {}",
                job.input
            ))]),
            Some(report) => finished.with_outputs(vec![JobOutput::text(report)]),
        }
    }
}

#[async_trait]
impl JobClient for StubJobClient {
    async fn create(&self, request: CreateJob) -> Result<Job, ProviderError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        if let Some(message) = &self.create_error {
            return Err(ProviderError::rejected(400, message.clone()));
        }

        // Continuations get a fresh id, as the real provider does.
        let id = self.next_id();
        let job = StubJob {
            input: request.input,
            remaining_polls: self.polls_before_terminal,
            cancelled: false,
        };
        debug!(job_id = %id, "stub provider accepted job");
        self.jobs.insert(id.clone(), job);
        Ok(Job::new(id, JobStatus::InProgress))
    }

    async fn get(&self, job_id: &str) -> Result<Job, ProviderError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.get_error {
            return Err(ProviderError::rejected(500, message.clone()));
        }

        let mut entry = self.jobs.get_mut(job_id).ok_or_else(|| not_found(job_id))?;
        let job = self.snapshot(job_id, &entry);
        if let Some(remaining) = entry.remaining_polls.as_mut() {
            *remaining = remaining.saturating_sub(1);
        }
        Ok(job)
    }

    async fn cancel(&self, job_id: &str) -> Result<Job, ProviderError> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        let mut entry = self.jobs.get_mut(job_id).ok_or_else(|| not_found(job_id))?;
        entry.cancelled = true;
        Ok(Job::new(job_id, JobStatus::Cancelled))
    }
}

fn not_found(job_id: &str) -> ProviderError {
    ProviderError::rejected(404, format!("interaction {job_id} not found"))
}
