//! In-memory storage adapter.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use crate::error::StorageError;
use crate::storage::StorageAdapter;

/// Adapter backed by an in-process map.
///
/// Cloning shares the underlying map, so a clone handed to another task sees
/// the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryAdapter {
    entries: Arc<RwLock<HashMap<String, Bytes>>>,
}

impl MemoryAdapter {
    /// Create an empty adapter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the adapter holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl StorageAdapter for MemoryAdapter {
    async fn read(&self, key: &str) -> Result<Option<Bytes>, StorageError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn write(&self, key: &str, value: Bytes) -> Result<(), StorageError> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }
}
