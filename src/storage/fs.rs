//! Filesystem storage adapter.
//!
//! Blobs are plain files under a root directory. Keys may contain `/` to
//! address nested paths (the upload pipeline stores `sessionId/key`), but a
//! key may never escape the root.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StorageError;
use crate::storage::StorageAdapter;

/// Adapter storing blobs as files under a root directory.
#[derive(Debug, Clone)]
pub struct FsAdapter {
    root: PathBuf,
}

impl FsAdapter {
    /// Create an adapter rooted at `root`. The directory is created lazily
    /// on the first write; a missing root lists as empty.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory this adapter stores under.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        if key.is_empty() || key.contains('\\') || key.starts_with('/') {
            return Err(StorageError::InvalidKey {
                key: key.to_string(),
            });
        }
        let relative = Path::new(key);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(StorageError::InvalidKey {
                key: key.to_string(),
            });
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl StorageAdapter for FsAdapter {
    async fn read(&self, key: &str) -> Result<Option<Bytes>, StorageError> {
        let path = self.resolve(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Read {
                key: key.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn write(&self, key: &str, value: Bytes) -> Result<(), StorageError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::Write {
                    key: key.to_string(),
                    reason: e.to_string(),
                })?;
        }
        tokio::fs::write(&path, &value)
            .await
            .map_err(|e| StorageError::Write {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Remove {
                key: key.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn list(&self) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(StorageError::List {
                        reason: e.to_string(),
                    });
                }
            };
            while let Some(entry) = entries.next_entry().await.map_err(|e| StorageError::List {
                reason: e.to_string(),
            })? {
                let path = entry.path();
                let file_type = entry.file_type().await.map_err(|e| StorageError::List {
                    reason: e.to_string(),
                })?;
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() {
                    if let Ok(relative) = path.strip_prefix(&self.root) {
                        keys.push(relative.to_string_lossy().replace('\\', "/"));
                    }
                }
            }
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FsAdapter::new(dir.path());
        adapter
            .write("creds.json", Bytes::from_static(b"{\"registered\":false}"))
            .await
            .unwrap();
        assert_eq!(
            adapter.read("creds.json").await.unwrap(),
            Some(Bytes::from_static(b"{\"registered\":false}"))
        );
    }

    #[tokio::test]
    async fn test_read_absent_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FsAdapter::new(dir.path());
        assert_eq!(adapter.read("missing.json").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FsAdapter::new(dir.path());
        adapter.write("k", Bytes::from_static(b"v")).await.unwrap();
        adapter.remove("k").await.unwrap();
        assert_eq!(adapter.read("k").await.unwrap(), None);
        adapter.remove("k").await.unwrap();
    }

    #[tokio::test]
    async fn test_nested_keys_round_trip_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FsAdapter::new(dir.path());
        adapter
            .write("GATE~X/creds.json", Bytes::from_static(b"a"))
            .await
            .unwrap();
        adapter
            .write("GATE~X/key-1.json", Bytes::from_static(b"b"))
            .await
            .unwrap();
        let mut keys = adapter.list().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["GATE~X/creds.json", "GATE~X/key-1.json"]);
    }

    #[tokio::test]
    async fn test_list_on_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FsAdapter::new(dir.path().join("never-created"));
        assert!(adapter.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_traversal_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FsAdapter::new(dir.path());
        for key in ["../escape", "/abs", "a/../../b", ""] {
            let err = adapter.read(key).await.unwrap_err();
            assert!(matches!(err, StorageError::InvalidKey { .. }), "{key}");
        }
    }
}
