use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::StorageError;

pub type ChatId = i64;

pub const STATE_FILE: &str = "state.json";
pub const CHATS_FILE: &str = "chats.json";

/// Small persistent key-value store for pipeline state.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    async fn set(&self, key: &str, value: String) -> Result<(), StorageError>;
}

/// The set of recipients a publication is delivered to.
#[async_trait]
pub trait ChatRegistry: Send + Sync {
    async fn chats(&self) -> Result<Vec<(ChatId, ChatMetadata)>, StorageError>;
    async fn remove(&self, chat_id: ChatId) -> Result<bool, StorageError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMetadata {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
    pub added_at: DateTime<Utc>,
}

impl ChatMetadata {
    pub fn new(title: Option<String>) -> Self {
        Self {
            title,
            kind: None,
            added_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    inner: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.inner.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        self.inner.write().await.insert(key.to_owned(), value);
        Ok(())
    }
}

/// JSON file, rewritten through a `.json.tmp` sibling on every change.
#[derive(Debug)]
struct JsonFile<T> {
    path: PathBuf,
    data: RwLock<T>,
}

impl<T> JsonFile<T>
where
    T: Serialize + DeserializeOwned + Default + Clone + Send + Sync,
{
    async fn open(path: PathBuf) -> Self {
        let data = read_json_with_tmp_fallback(&path).await;
        Self {
            path,
            data: RwLock::new(data),
        }
    }

    async fn persist(&self, data: &T) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec_pretty(data)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = tmp_path(&self.path);
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), "persisted");
        Ok(())
    }

    /// Applies `change` to a copy and keeps it only once it is on disk.
    async fn update<R>(&self, change: impl FnOnce(&mut T) -> R) -> Result<R, StorageError> {
        let mut data = self.data.write().await;
        let mut next = data.clone();
        let result = change(&mut next);
        self.persist(&next).await?;
        *data = next;
        Ok(result)
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    path.with_extension("json.tmp")
}

async fn read_json_with_tmp_fallback<T: DeserializeOwned + Default>(path: &Path) -> T {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(_) => return T::default(),
    };
    match serde_json::from_slice::<T>(&bytes) {
        Ok(value) => value,
        Err(err) => {
            warn!(error = %err, path = %path.display(), "failed to parse JSON, trying tmp fallback");
            match tokio::fs::read(tmp_path(path)).await {
                Ok(tmp) => serde_json::from_slice(&tmp).unwrap_or_default(),
                Err(_) => T::default(),
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct JsonStateStore {
    file: Arc<JsonFile<BTreeMap<String, String>>>,
}

impl JsonStateStore {
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            file: Arc::new(JsonFile::open(path.into()).await),
        }
    }

    pub async fn open_in(dir: impl AsRef<Path>) -> Self {
        Self::open(dir.as_ref().join(STATE_FILE)).await
    }

    pub async fn clear(&self) -> Result<(), StorageError> {
        self.file.update(|data| data.clear()).await
    }
}

#[async_trait]
impl StateStore for JsonStateStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.file.data.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        self.file
            .update(|data| {
                data.insert(key.to_owned(), value);
            })
            .await
    }
}

#[derive(Debug, Clone)]
pub struct JsonChatRegistry {
    file: Arc<JsonFile<BTreeMap<ChatId, ChatMetadata>>>,
}

impl JsonChatRegistry {
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            file: Arc::new(JsonFile::open(path.into()).await),
        }
    }

    pub async fn open_in(dir: impl AsRef<Path>) -> Self {
        Self::open(dir.as_ref().join(CHATS_FILE)).await
    }

    /// Registers `chat_id`; returns `false` if it was already present.
    pub async fn add(&self, chat_id: ChatId, metadata: ChatMetadata) -> Result<bool, StorageError> {
        self.file
            .update(|data| {
                if data.contains_key(&chat_id) {
                    false
                } else {
                    data.insert(chat_id, metadata);
                    true
                }
            })
            .await
    }

    pub async fn clear(&self) -> Result<(), StorageError> {
        self.file.update(|data| data.clear()).await
    }
}

#[async_trait]
impl ChatRegistry for JsonChatRegistry {
    async fn chats(&self) -> Result<Vec<(ChatId, ChatMetadata)>, StorageError> {
        let data = self.file.data.read().await;
        Ok(data.iter().map(|(id, meta)| (*id, meta.clone())).collect())
    }

    async fn remove(&self, chat_id: ChatId) -> Result<bool, StorageError> {
        self.file.update(|data| data.remove(&chat_id).is_some()).await
    }
}
