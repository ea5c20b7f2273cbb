//! Cache-aside layer: a memory tier in front of an optional persistent tier.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::ConnectorError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub payload: T,
    pub inserted_at: DateTime<Utc>,
    /// `None` lives until explicitly invalidated.
    pub expires_at: Option<DateTime<Utc>>,
}

impl<T> CacheEntry<T> {
    pub fn new(payload: T, ttl: Option<Duration>) -> Self {
        let inserted_at = Utc::now();
        // A TTL beyond the representable date range never expires.
        let expires_at = ttl.and_then(|ttl| {
            chrono::Duration::from_std(ttl)
                .ok()
                .and_then(|ttl| inserted_at.checked_add_signed(ttl))
        });
        Self {
            payload,
            inserted_at,
            expires_at,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Utc::now() >= at)
    }
}

/// Pluggable persistent tier.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry<Value>>, ConnectorError>;
    async fn put(&self, key: &str, entry: &CacheEntry<Value>) -> Result<(), ConnectorError>;
    async fn remove(&self, key: &str) -> Result<(), ConnectorError>;
    async fn clear(&self) -> Result<(), ConnectorError>;
}

/// Stores each entry as `<dir>/<sha256(key)>.json`.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.dir.join(format!("{}.json", hex::encode(digest)))
    }
}

#[async_trait]
impl PersistentStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry<Value>>, ConnectorError> {
        let data = match tokio::fs::read(self.path_for(key)).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|e| ConnectorError::ProtocolError(format!("Corrupt cache entry: {e}")))
    }

    async fn put(&self, key: &str, entry: &CacheEntry<Value>) -> Result<(), ConnectorError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let data = serde_json::to_vec(entry)
            .map_err(|e| ConnectorError::ProtocolError(format!("Cannot encode cache entry: {e}")))?;
        tokio::fs::write(self.path_for(key), data).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), ConnectorError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    async fn clear(&self) -> Result<(), ConnectorError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                tokio::fs::remove_file(path).await?;
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct Cache {
    memory: RwLock<HashMap<String, CacheEntry<Value>>>,
    persistent: Option<Arc<dyn PersistentStore>>,
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("entries", &self.len())
            .field("persistent", &self.persistent.is_some())
            .finish()
    }
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_persistent(store: Arc<dyn PersistentStore>) -> Self {
        Self {
            memory: RwLock::new(HashMap::new()),
            persistent: Some(store),
        }
    }

    /// Number of entries in the memory tier.
    pub fn len(&self) -> usize {
        self.memory.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the cached value for `key`, or run `fetch`, store its result in
    /// both tiers and return it. Fetch errors are returned and not cached.
    pub async fn get_or_fetch<T, F, Fut>(
        &self,
        key: &str,
        fetch: F,
        ttl: Option<Duration>,
    ) -> Result<T, ConnectorError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ConnectorError>>,
    {
        if let Some(value) = self.get(key).await? {
            return Ok(value);
        }
        tracing::debug!(key, "Cache miss");
        let value = fetch().await?;
        self.put(key, &value, ttl).await?;
        Ok(value)
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ConnectorError> {
        let Some(entry) = self.lookup(key).await else {
            return Ok(None);
        };
        match serde_json::from_value(entry.payload) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!(key, error = %e, "Cached value has unexpected shape, ignoring");
                Ok(None)
            }
        }
    }

    pub async fn put<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), ConnectorError> {
        let payload = serde_json::to_value(value)
            .map_err(|e| ConnectorError::Validation(format!("Value is not cacheable: {e}")))?;
        let entry = CacheEntry::new(payload, ttl);
        if let Some(store) = &self.persistent {
            if let Err(e) = store.put(key, &entry).await {
                tracing::warn!(key, error = %e, "Persistent cache write failed");
            }
        }
        self.memory
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), entry);
        Ok(())
    }

    pub async fn invalidate(&self, key: &str) -> Result<(), ConnectorError> {
        self.memory
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        if let Some(store) = &self.persistent {
            store.remove(key).await?;
        }
        Ok(())
    }

    pub async fn clear(&self) -> Result<(), ConnectorError> {
        self.memory
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        if let Some(store) = &self.persistent {
            store.clear().await?;
        }
        Ok(())
    }

    async fn lookup(&self, key: &str) -> Option<CacheEntry<Value>> {
        let in_memory = self
            .memory
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned();
        match in_memory {
            Some(entry) if !entry.is_expired() => return Some(entry),
            Some(_) => {
                self.memory
                    .write()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(key);
            }
            None => {}
        }

        let store = self.persistent.as_ref()?;
        let entry = match store.get(key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key, error = %e, "Persistent cache read failed");
                return None;
            }
        };
        if entry.is_expired() {
            if let Err(e) = store.remove(key).await {
                tracing::debug!(key, error = %e, "Failed to drop expired cache entry");
            }
            return None;
        }
        self.memory
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), entry.clone());
        Some(entry)
    }
}
