use crate::config::AppConfig;
use anyhow::Result;
use axum::response::sse::Event;
use dashmap::DashMap;
use deepresearch_core::{
    DeepResearchArgs, JsonFileStateStore, ProviderChoice, REGISTRY_KEY, ResearchJobManager,
    ResearchTools, SessionRegistry, StateError, StateStore, ToolResponse,
};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::convert::Infallible;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::{Semaphore, broadcast};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{self as stream, Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    tools: ResearchTools,
    conversations: Arc<ConversationStore>,
    task_service: Arc<TaskService>,
    auth_token: Option<Arc<String>>,
}

impl AppState {
    /// State backed by the provider selected in `config`.
    pub fn try_new(config: &AppConfig) -> Result<Self> {
        let client = ProviderChoice::offline(config.offline).build(&config.research)?;
        let tools = ResearchTools::new(ResearchJobManager::from_config(client, &config.research));
        Ok(Self::with_tools(config, tools))
    }

    pub fn with_tools(config: &AppConfig, tools: ResearchTools) -> Self {
        Self {
            tools,
            conversations: Arc::new(ConversationStore::new(config.state_dir.clone())),
            task_service: Arc::new(
                TaskService::new(config.max_concurrency).with_retention(config.task_retention),
            ),
            auth_token: config
                .auth_token
                .as_ref()
                .map(|token| Arc::new(token.to_string())),
        }
    }

    pub fn tools(&self) -> &ResearchTools {
        &self.tools
    }

    pub fn conversations(&self) -> Arc<ConversationStore> {
        self.conversations.clone()
    }

    pub fn task_service(&self) -> Arc<TaskService> {
        self.task_service.clone()
    }

    pub fn auth_token(&self) -> Option<Arc<String>> {
        self.auth_token.clone()
    }

    /// Stop accepting work and abandon polling for every running task.
    pub fn shutdown(&self) {
        self.task_service.shutdown();
    }
}

/// Session registries keyed by conversation id.
pub struct ConversationStore {
    registries: DashMap<String, SessionRegistry>,
    state_dir: Option<PathBuf>,
}

impl ConversationStore {
    pub fn new(state_dir: Option<PathBuf>) -> Self {
        Self {
            registries: DashMap::new(),
            state_dir,
        }
    }

    /// File-backed conversations are written out immediately, so the id
    /// resolves after a restart even before any session is recorded.
    pub async fn create(&self) -> Result<String, StateError> {
        let conversation_id = Uuid::new_v4().to_string();
        let registry = match &self.state_dir {
            Some(dir) => {
                let store =
                    JsonFileStateStore::new(dir.join(format!("{conversation_id}.json")));
                store
                    .store(REGISTRY_KEY, Value::Object(Map::new()))
                    .await?;
                SessionRegistry::new(Arc::new(store))
            }
            None => SessionRegistry::in_memory(),
        };
        self.registries.insert(conversation_id.clone(), registry);
        info!(%conversation_id, "conversation created");
        Ok(conversation_id)
    }

    /// Registries persisted by an earlier process are reopened on first access.
    pub fn get(&self, conversation_id: &str) -> Option<SessionRegistry> {
        if let Some(registry) = self.registries.get(conversation_id) {
            return Some(registry.value().clone());
        }

        let dir = self.state_dir.as_ref()?;
        // Only canonical uuids map to file names.
        let conversation_id = Uuid::parse_str(conversation_id).ok()?.to_string();
        let path = dir.join(format!("{conversation_id}.json"));
        if !path.is_file() {
            return None;
        }

        let registry = SessionRegistry::new(Arc::new(JsonFileStateStore::new(path)));
        Some(
            self.registries
                .entry(conversation_id)
                .or_insert(registry)
                .value()
                .clone(),
        )
    }

    pub fn len(&self) -> usize {
        self.registries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registries.is_empty()
    }
}

/// Finished task records kept for status lookups unless configured otherwise.
pub const DEFAULT_TASK_RETENTION: usize = 1024;

/// Background `deep_research` runs, bounded by a semaphore.
///
/// Working records are always kept; finished ones are evicted oldest first
/// once more than `retention` of them exist.
pub struct TaskService {
    semaphore: Arc<Semaphore>,
    max_concurrency: usize,
    tasks: Arc<DashMap<String, TaskRecord>>,
    streams: Arc<DashMap<String, broadcast::Sender<TaskEvent>>>,
    finished: Arc<FinishedTasks>,
    shutdown: CancellationToken,
}

impl TaskService {
    pub fn new(max_concurrency: usize) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
            tasks: Arc::new(DashMap::new()),
            streams: Arc::new(DashMap::new()),
            finished: Arc::new(FinishedTasks::new(DEFAULT_TASK_RETENTION)),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_retention(mut self, retention: usize) -> Self {
        self.finished = Arc::new(FinishedTasks::new(retention));
        self
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            info!(
                working = self.working_tasks(),
                "cancelling in-flight research tasks"
            );
        }
        self.shutdown.cancel();
    }

    pub fn start_task(
        &self,
        tools: ResearchTools,
        conversation_id: String,
        registry: SessionRegistry,
        args: DeepResearchArgs,
    ) -> String {
        let task_id = Uuid::new_v4().to_string();

        let (sender, _rx) = broadcast::channel(16);
        self.streams.insert(task_id.clone(), sender.clone());
        self.tasks.insert(
            task_id.clone(),
            TaskRecord {
                conversation_id: conversation_id.clone(),
                progress: TaskProgress::Working,
            },
        );

        let semaphore = self.semaphore.clone();
        let tasks = self.tasks.clone();
        let streams = self.streams.clone();
        let finished = self.finished.clone();
        let shutdown = self.shutdown.clone();
        let task_id_for_task = task_id.clone();

        tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    ToolResponse::error("Research task cancelled before it started.")
                }
                permit = semaphore.acquire_owned() => match permit {
                    Ok(_permit) => {
                        tools
                            .deep_research_until_cancelled(&registry, args, &shutdown)
                            .await
                    }
                    Err(err) => ToolResponse::error(err),
                },
            };

            let event = TaskEvent::finished(&task_id_for_task, result.clone());
            if result.is_success() {
                info!(task_id = %task_id_for_task, "research task completed");
            } else {
                warn!(
                    task_id = %task_id_for_task,
                    message = result.message.as_deref().unwrap_or_default(),
                    "research task failed"
                );
            }

            // The record is final before the event goes out; see `event_stream`.
            tasks.insert(
                task_id_for_task.clone(),
                TaskRecord {
                    conversation_id,
                    progress: TaskProgress::Finished {
                        result,
                        event: event.clone(),
                    },
                },
            );
            let _ = sender.send(event);
            streams.remove(&task_id_for_task);

            for evicted in finished.push(task_id_for_task) {
                tasks.remove(&evicted);
            }
        });

        task_id
    }

    pub fn status(&self, task_id: &str) -> Option<TaskStatus> {
        self.tasks.get(task_id).map(|record| {
            let record = record.value();
            let (state, result) = match &record.progress {
                TaskProgress::Working => (TaskState::Working, None),
                TaskProgress::Finished { result, .. } => {
                    (TaskState::from_result(result), Some(result.clone()))
                }
            };
            TaskStatus {
                task_id: task_id.to_string(),
                conversation_id: record.conversation_id.clone(),
                state,
                result,
            }
        })
    }

    pub fn event_stream(&self, task_id: &str) -> Option<SseStream> {
        if let Some(stream) = self.finished_stream(task_id) {
            return Some(stream);
        }

        let rx = self.streams.get(task_id).map(|sender| sender.subscribe());
        // A record still working after subscribing has not sent its event yet.
        if let Some(stream) = self.finished_stream(task_id) {
            return Some(stream);
        }
        let rx = rx?;

        let snapshot = TaskEvent::working(task_id).into_sse_event();
        let updates = BroadcastStream::new(rx).filter_map(|event| match event {
            Ok(event) => Some(Result::<Event, Infallible>::Ok(event.into_sse_event())),
            Err(err) => {
                warn!(error = %err, "task event stream lagged");
                None
            }
        });
        let stream = stream::once(Result::<Event, Infallible>::Ok(snapshot)).chain(updates);
        Some(Box::pin(stream) as SseStream)
    }

    pub fn metrics(&self) -> TaskMetrics {
        TaskMetrics {
            max_concurrency: self.max_concurrency,
            available_permits: self.semaphore.available_permits(),
            working_tasks: self.working_tasks(),
            total_tasks: self.tasks.len(),
        }
    }

    fn working_tasks(&self) -> usize {
        self.tasks
            .iter()
            .filter(|entry| matches!(entry.value().progress, TaskProgress::Working))
            .count()
    }

    fn finished_stream(&self, task_id: &str) -> Option<SseStream> {
        let record = self.tasks.get(task_id)?;
        match &record.value().progress {
            TaskProgress::Finished { event, .. } => {
                let event = event.clone().into_sse_event();
                let stream = stream::iter(vec![Result::<Event, Infallible>::Ok(event)]);
                Some(Box::pin(stream))
            }
            TaskProgress::Working => None,
        }
    }
}

/// Completion order of finished tasks, capped at `capacity`.
struct FinishedTasks {
    capacity: usize,
    order: Mutex<VecDeque<String>>,
}

impl FinishedTasks {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: Mutex::new(VecDeque::new()),
        }
    }

    /// Records a finished task and returns the ids that fell out of the window.
    fn push(&self, task_id: String) -> Vec<String> {
        let mut order = match self.order.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        order.push_back(task_id);
        let overflow = order.len().saturating_sub(self.capacity);
        order.drain(..overflow).collect()
    }
}

pub type SseStream = Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>>;

#[derive(Debug)]
struct TaskRecord {
    conversation_id: String,
    progress: TaskProgress,
}

#[derive(Debug)]
enum TaskProgress {
    Working,
    Finished {
        result: ToolResponse,
        event: TaskEvent,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Working,
    Completed,
    Failed,
}

impl TaskState {
    fn from_result(result: &ToolResponse) -> Self {
        if result.is_success() {
            TaskState::Completed
        } else {
            TaskState::Failed
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            TaskState::Working => "working",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct TaskStatus {
    pub task_id: String,
    pub conversation_id: String,
    pub state: TaskState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ToolResponse>,
}

#[derive(Clone, Copy, Debug, Serialize)]
pub struct TaskMetrics {
    pub max_concurrency: usize,
    pub available_permits: usize,
    pub working_tasks: usize,
    pub total_tasks: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct TaskEvent {
    pub task_id: String,
    pub state: TaskState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ToolResponse>,
}

impl TaskEvent {
    fn working(task_id: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            state: TaskState::Working,
            result: None,
        }
    }

    fn finished(task_id: &str, result: ToolResponse) -> Self {
        Self {
            task_id: task_id.to_string(),
            state: TaskState::from_result(&result),
            result: Some(result),
        }
    }

    pub fn into_sse_event(self) -> Event {
        let data = serde_json::to_string(&self).unwrap_or_else(|_| {
            serde_json::json!({
                "task_id": self.task_id,
                "state": TaskState::Failed,
                "error": "failed to serialize task event",
            })
            .to_string()
        });

        Event::default().event(self.state.as_str()).data(data)
    }
}
