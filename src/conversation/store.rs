//! Conversation persistence.
//!
//! [`ConversationStore`] is what sessions talk to. [`NamespacedStore`]
//! implements it over a raw string key-value backend so several backends can
//! share one physical store without key collisions.

use crate::error::LlmError;
use crate::types::Conversation;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Asynchronous conversation key → record mapping.
///
/// `get`/`set` are atomic units; concurrent turns on the same key are last
/// writer wins.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Conversation>, LlmError>;

    async fn set(&self, key: &str, conversation: &Conversation) -> Result<(), LlmError>;

    /// Remove every conversation this store owns.
    async fn clear(&self) -> Result<(), LlmError>;
}

/// Raw string storage underneath [`NamespacedStore`].
#[async_trait]
pub trait KeyValueBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, LlmError>;

    async fn set(&self, key: &str, value: String) -> Result<(), LlmError>;

    async fn remove_prefix(&self, prefix: &str) -> Result<usize, LlmError>;
}

/// In-process backend. Clones share the same map.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    entries: Arc<RwLock<BTreeMap<String, String>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl KeyValueBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, LlmError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), LlmError> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove_prefix(&self, prefix: &str) -> Result<usize, LlmError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));
        Ok(before - entries.len())
    }
}

/// JSON file backend. The whole map is rewritten through a temporary file on
/// every change.
pub struct FileBackend {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<BTreeMap<String, String>, LlmError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                LlmError::StoreError(format!(
                    "Corrupt conversation store {}: {e}",
                    self.path.display()
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, entries: &BTreeMap<String, String>) -> Result<(), LlmError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(entries)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueBackend for FileBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, LlmError> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.remove(key))
    }

    async fn set(&self, key: &str, value: String) -> Result<(), LlmError> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load().await?;
        entries.insert(key.to_string(), value);
        self.save(&entries).await
    }

    async fn remove_prefix(&self, prefix: &str) -> Result<usize, LlmError> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load().await?;
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));
        let removed = before - entries.len();
        if removed > 0 {
            self.save(&entries).await?;
        }
        Ok(removed)
    }
}

/// Conversation store scoped to one namespace of a shared backend.
#[derive(Clone)]
pub struct NamespacedStore {
    backend: Arc<dyn KeyValueBackend>,
    namespace: String,
}

impl NamespacedStore {
    pub fn new(backend: Arc<dyn KeyValueBackend>, namespace: impl Into<String>) -> Self {
        Self {
            backend,
            namespace: namespace.into(),
        }
    }

    /// Fresh in-memory store.
    pub fn in_memory(namespace: impl Into<String>) -> Self {
        Self::new(Arc::new(MemoryBackend::new()), namespace)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn prefix(&self) -> String {
        format!("{}:", self.namespace)
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:{key}", self.namespace)
    }
}

#[async_trait]
impl ConversationStore for NamespacedStore {
    async fn get(&self, key: &str) -> Result<Option<Conversation>, LlmError> {
        let Some(raw) = self.backend.get(&self.full_key(key)).await? else {
            return Ok(None);
        };
        let conversation = serde_json::from_str(&raw).map_err(|e| {
            LlmError::StoreError(format!("Unreadable conversation '{key}': {e}"))
        })?;
        Ok(Some(conversation))
    }

    async fn set(&self, key: &str, conversation: &Conversation) -> Result<(), LlmError> {
        let raw = serde_json::to_string(conversation)?;
        self.backend.set(&self.full_key(key), raw).await
    }

    async fn clear(&self) -> Result<(), LlmError> {
        let removed = self.backend.remove_prefix(&self.prefix()).await?;
        tracing::debug!(namespace = %self.namespace, removed, "cleared conversations");
        Ok(())
    }
}
