use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::errors::StudioError;

/// Key-value persistence used by the provider registry
///
/// Values are opaque strings (the registry stores JSON documents), mirroring
/// the browser storage the profiles were first kept in.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StudioError>;

    async fn set(&self, key: &str, value: String) -> Result<(), StudioError>;

    async fn remove(&self, key: &str) -> Result<(), StudioError>;
}

/// Store backed by a single JSON object on disk
///
/// The whole file is rewritten on every change; it only ever holds a handful
/// of provider profiles.
pub struct FileStore {
    path: PathBuf,
    // serializes read-modify-write cycles
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<Map<String, Value>, StudioError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => {
                return Err(StudioError::Storage(format!(
                    "Failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        if raw.trim().is_empty() {
            return Ok(Map::new());
        }

        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) | Err(_) => Err(StudioError::Storage(format!(
                "{} does not contain a JSON object",
                self.path.display()
            ))),
        }
    }

    async fn write_all(&self, map: Map<String, Value>) -> Result<(), StudioError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                StudioError::Storage(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        let body = serde_json::to_string_pretty(&Value::Object(map))
            .map_err(|e| StudioError::Storage(e.to_string()))?;

        // write-then-rename so a crash never leaves a truncated file
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await.map_err(|e| {
            StudioError::Storage(format!("Failed to write {}: {}", tmp.display(), e))
        })?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            StudioError::Storage(format!("Failed to replace {}: {}", self.path.display(), e))
        })
    }
}

#[async_trait]
impl ProfileStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StudioError> {
        let _guard = self.lock.lock().await;
        let map = self.read_all().await?;
        Ok(map.get(key).and_then(Value::as_str).map(str::to_string))
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StudioError> {
        let _guard = self.lock.lock().await;
        let mut map = self.read_all().await?;
        map.insert(key.to_string(), Value::String(value));
        self.write_all(map).await
    }

    async fn remove(&self, key: &str) -> Result<(), StudioError> {
        let _guard = self.lock.lock().await;
        let mut map = self.read_all().await?;
        if map.shift_remove(key).is_some() {
            self.write_all(map).await?;
        }
        Ok(())
    }
}

/// In-memory store for tests and ephemeral sessions
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(key: &str, value: impl Into<String>) -> Self {
        let mut entries = HashMap::new();
        entries.insert(key.to_string(), value.into());
        Self {
            entries: Mutex::new(entries),
        }
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StudioError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StudioError> {
        self.entries.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StudioError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}
