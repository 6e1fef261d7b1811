//! Conversation-state containers.
//!
//! A conversation owns one key-value container; the research registry is a
//! single entry inside it. Hosts pick the backing store: in memory for
//! short-lived conversations, a JSON file when the registry must outlive the
//! process.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::debug;

use crate::StateError;

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<Value>, StateError>;

    async fn store(&self, key: &str, value: Value) -> Result<(), StateError>;
}

pub type DynStateStore = Arc<dyn StateStore>;

/// Process-lifetime state container.
#[derive(Default)]
pub struct InMemoryStateStore {
    values: DashMap<String, Value>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn load(&self, key: &str) -> Result<Option<Value>, StateError> {
        Ok(self.values.get(key).map(|entry| entry.value().clone()))
    }

    async fn store(&self, key: &str, value: Value) -> Result<(), StateError> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }
}

/// State container persisted as one JSON object in a file.
///
/// Writes go to a sibling temp file followed by a rename, so a crash leaves
/// either the old or the new document on disk.
pub struct JsonFileStateStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_document(&self) -> Result<Map<String, Value>, StateError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Map::new()),
            Err(err) => return Err(StateError::io(&self.path, err)),
        };

        if raw.trim().is_empty() {
            return Ok(Map::new());
        }

        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(StateError::corrupt(
                self.path.display().to_string(),
                "state file must contain a JSON object",
            )),
            Err(err) => Err(StateError::corrupt(self.path.display().to_string(), err)),
        }
    }

    async fn write_document(&self, document: &Map<String, Value>) -> Result<(), StateError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| StateError::io(parent, err))?;
        }

        let body = serde_json::to_vec_pretty(document)
            .map_err(|err| StateError::corrupt(self.path.display().to_string(), err))?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|err| StateError::io(&tmp, err))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|err| StateError::io(&self.path, err))?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for JsonFileStateStore {
    async fn load(&self, key: &str) -> Result<Option<Value>, StateError> {
        let mut document = self.read_document().await?;
        Ok(document.remove(key))
    }

    async fn store(&self, key: &str, value: Value) -> Result<(), StateError> {
        let _guard = self.write_lock.lock().await;
        let mut document = self.read_document().await?;
        document.insert(key.to_string(), value);
        self.write_document(&document).await?;
        debug!(path = %self.path.display(), key, "persisted conversation state");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn in_memory_store_round_trips_values() {
        let store = InMemoryStateStore::new();
        assert!(store.load("research_sessions").await.unwrap().is_none());

        store
            .store("research_sessions", json!({"J1": "topic..."}))
            .await
            .unwrap();
        assert_eq!(
            store.load("research_sessions").await.unwrap(),
            Some(json!({"J1": "topic..."}))
        );
    }

    #[tokio::test]
    async fn file_store_keeps_unrelated_keys() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("nested").join("state.json");
        let store = JsonFileStateStore::new(&path);

        store.store("other", json!(1)).await.unwrap();
        store
            .store("research_sessions", json!({"J1": "a..."}))
            .await
            .unwrap();

        let reopened = JsonFileStateStore::new(&path);
        assert_eq!(reopened.load("other").await.unwrap(), Some(json!(1)));
        assert_eq!(
            reopened.load("research_sessions").await.unwrap(),
            Some(json!({"J1": "a..."}))
        );
    }

    #[tokio::test]
    async fn file_store_treats_missing_file_as_empty() {
        let temp = TempDir::new().expect("temp dir");
        let store = JsonFileStateStore::new(temp.path().join("absent.json"));
        assert!(store.load("research_sessions").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_store_rejects_non_object_documents() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("state.json");
        std::fs::write(&path, "[1, 2, 3]").unwrap();

        let err = JsonFileStateStore::new(&path)
            .load("research_sessions")
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::Corrupt { .. }));
    }
}
