//! Prefix-namespacing adapter wrapper.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StorageError;
use crate::storage::StorageAdapter;

/// Wraps an adapter so every key lives under `<prefix>/`.
///
/// Used to address one archived session inside a shared archive destination:
/// the upload pipeline writes through a scope named after the minted session
/// id, and the restore flow reads the same scope back as a plain adapter.
pub struct ScopedAdapter {
    inner: Arc<dyn StorageAdapter>,
    prefix: String,
}

impl ScopedAdapter {
    /// Scope `inner` under `prefix`. Trailing slashes are normalized away.
    pub fn new(inner: Arc<dyn StorageAdapter>, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into().trim_matches('/').to_string();
        Self { inner, prefix }
    }

    fn full_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.prefix, key)
        }
    }
}

#[async_trait]
impl StorageAdapter for ScopedAdapter {
    async fn read(&self, key: &str) -> Result<Option<Bytes>, StorageError> {
        self.inner.read(&self.full_key(key)).await
    }

    async fn write(&self, key: &str, value: Bytes) -> Result<(), StorageError> {
        self.inner.write(&self.full_key(key), value).await
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.inner.remove(&self.full_key(key)).await
    }

    async fn list(&self) -> Result<Vec<String>, StorageError> {
        let scope = format!("{}/", self.prefix);
        let keys = self.inner.list().await?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(&scope).map(str::to_string))
            .collect())
    }
}
