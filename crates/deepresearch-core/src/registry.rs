use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::StateError;
use crate::state::{DynStateStore, InMemoryStateStore};

/// Well-known key of the registry inside a conversation's state container.
pub const REGISTRY_KEY: &str = "research_sessions";

const LABEL_CHARS: usize = 50;
const LABEL_MARKER: &str = "...";

/// Snapshot of the registry: interaction id to topic label.
pub type Sessions = BTreeMap<String, String>;

/// Topic label for a research thread: the first 50 characters of the query
/// followed by `...`, even when nothing was cut.
pub fn session_label(query: &str) -> String {
    let mut label: String = query.chars().take(LABEL_CHARS).collect();
    label.push_str(LABEL_MARKER);
    label
}

/// Durable mapping of provider interaction ids to topic labels, scoped to one
/// conversation.
///
/// Clones share the same store and write lock, so concurrent turns of one
/// conversation apply their read-modify-write cycles one at a time.
#[derive(Clone)]
pub struct SessionRegistry {
    store: DynStateStore,
    write_lock: Arc<Mutex<()>>,
}

impl SessionRegistry {
    pub fn new(store: DynStateStore) -> Self {
        Self {
            store,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Registry backed by a fresh in-memory container.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryStateStore::new()))
    }

    pub async fn get(&self, job_id: &str) -> Result<Option<String>, StateError> {
        let sessions = self.load().await?;
        Ok(sessions.get(job_id).cloned())
    }

    /// Owned snapshot of the full mapping.
    pub async fn list(&self) -> Result<Sessions, StateError> {
        self.load().await
    }

    pub async fn put(
        &self,
        job_id: impl Into<String>,
        label: impl Into<String>,
    ) -> Result<(), StateError> {
        let (job_id, label) = (job_id.into(), label.into());
        self.update(move |sessions| {
            sessions.insert(job_id, label);
        })
        .await
    }

    /// Returns whether the entry existed.
    pub async fn remove(&self, job_id: &str) -> Result<bool, StateError> {
        self.update(|sessions| sessions.remove(job_id).is_some())
            .await
    }

    /// Empties the registry, returning the ids that were present.
    pub async fn clear(&self) -> Result<Vec<String>, StateError> {
        self.update(|sessions| std::mem::take(sessions).into_keys().collect())
            .await
    }

    async fn update<R>(&self, mutate: impl FnOnce(&mut Sessions) -> R) -> Result<R, StateError> {
        let _guard = self.write_lock.lock().await;
        let mut sessions = self.load().await?;
        let before = sessions.clone();
        let result = mutate(&mut sessions);
        if sessions != before {
            let value = serde_json::to_value(&sessions)
                .map_err(|err| StateError::corrupt(REGISTRY_KEY, err))?;
            self.store.store(REGISTRY_KEY, value).await?;
        }
        Ok(result)
    }

    async fn load(&self) -> Result<Sessions, StateError> {
        match self.store.load(REGISTRY_KEY).await? {
            None | Some(Value::Null) => Ok(Sessions::new()),
            Some(value) => {
                serde_json::from_value(value).map_err(|err| StateError::corrupt(REGISTRY_KEY, err))
            }
        }
    }
}
