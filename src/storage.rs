//! Persistent key-value area backing the verdict cache.
//!
//! Values are JSON documents stored under a namespace key. The cache keeps its
//! whole store under a single namespace, so one read and one write per
//! operation is all it ever needs.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("storage contents are not valid JSON: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
pub trait StorageArea: Send + Sync {
    async fn get(&self, namespace: &str) -> StorageResult<Option<Value>>;
    async fn set(&self, namespace: &str, value: Value) -> StorageResult<()>;
    async fn remove(&self, namespace: &str) -> StorageResult<()>;
}

/// A JSON object file mapping namespace -> document.
///
/// Writes go to a temporary sibling first and are renamed into place so an
/// interrupted write never leaves a truncated file behind.
#[derive(Debug)]
pub struct JsonFileStorage {
    path: PathBuf,
    // serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> StorageResult<Map<String, Value>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => {
                return Err(StorageError::Io {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };

        if content.trim().is_empty() {
            return Ok(Map::new());
        }

        match serde_json::from_str::<Value>(&content)? {
            Value::Object(map) => Ok(map),
            _ => Err(StorageError::Unavailable(format!(
                "{} does not contain a JSON object",
                self.path.display()
            ))),
        }
    }

    async fn write_all(&self, map: Map<String, Value>) -> StorageResult<()> {
        let io_err = |source| StorageError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
            }
        }

        let content = serde_json::to_string_pretty(&Value::Object(map))?;
        let temp_path = self.path.with_extension("tmp");

        {
            let mut file = tokio::fs::File::create(&temp_path).await.map_err(io_err)?;
            file.write_all(content.as_bytes()).await.map_err(io_err)?;
            // flushed to disk before the rename makes it visible
            file.sync_all().await.map_err(io_err)?;
        }
        tokio::fs::rename(&temp_path, &self.path).await.map_err(io_err)?;

        debug!("Wrote storage file {}", self.path.display());
        Ok(())
    }

    /// Current contents for a read-modify-write. A file that is not a JSON
    /// object is replaced wholesale rather than blocking every later write.
    async fn read_for_update(&self) -> StorageResult<Map<String, Value>> {
        match self.read_all().await {
            Err(e @ (StorageError::Serialize(_) | StorageError::Unavailable(_))) => {
                warn!("Overwriting unreadable storage file {}: {}", self.path.display(), e);
                Ok(Map::new())
            }
            other => other,
        }
    }
}

#[async_trait]
impl StorageArea for JsonFileStorage {
    async fn get(&self, namespace: &str) -> StorageResult<Option<Value>> {
        let mut map = self.read_all().await?;
        Ok(map.remove(namespace))
    }

    async fn set(&self, namespace: &str, value: Value) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.read_for_update().await?;
        map.insert(namespace.to_string(), value);
        self.write_all(map).await
    }

    async fn remove(&self, namespace: &str) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.read_for_update().await?;
        if map.remove(namespace).is_some() {
            self.write_all(map).await?;
        }
        Ok(())
    }
}

/// In-process storage. Can be told to fail every call.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    values: Mutex<HashMap<String, Value>>,
    failing: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage whose every read and write is rejected.
    pub fn failing() -> Self {
        let storage = Self::default();
        storage.set_failing(true);
        storage
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> StorageResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StorageError::Unavailable("memory storage set to fail".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl StorageArea for MemoryStorage {
    async fn get(&self, namespace: &str) -> StorageResult<Option<Value>> {
        self.check()?;
        Ok(self.values.lock().await.get(namespace).cloned())
    }

    async fn set(&self, namespace: &str, value: Value) -> StorageResult<()> {
        self.check()?;
        self.values.lock().await.insert(namespace.to_string(), value);
        Ok(())
    }

    async fn remove(&self, namespace: &str) -> StorageResult<()> {
        self.check()?;
        self.values.lock().await.remove(namespace);
        Ok(())
    }
}
