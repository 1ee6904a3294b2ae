//! Credential persistence over a storage adapter.
//!
//! Bridges the protocol client's "load my credential/key files, persist
//! whenever they change" expectation onto a [`StorageAdapter`]. The
//! registration record lives under [`CREDS_KEY`]; every other `.json` entry
//! is key material, persisted entry-by-entry so a rotation notification only
//! costs the writes it actually changed.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::storage::StorageAdapter;

/// Well-known key holding the registration record.
pub const CREDS_KEY: &str = "creds.json";

/// Registration record for a protocol-client session.
///
/// Only the registration flag is interpreted here; identity keys and the
/// rest of the client's state ride along as opaque fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Creds {
    #[serde(default)]
    pub registered: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Creds {
    /// A fresh, unregistered record.
    pub fn fresh() -> Self {
        Self::default()
    }
}

/// Credential and key material for one pairing attempt.
///
/// Owned exclusively by one lifecycle flow at a time; never shared between
/// two live protocol-client handles.
#[derive(Debug, Clone, Default)]
pub struct CredentialBundle {
    pub creds: Creds,
    /// Key material by id (the id `key-1` is stored as `key-1.json`).
    pub keys: HashMap<String, serde_json::Value>,
}

impl CredentialBundle {
    pub fn is_registered(&self) -> bool {
        self.creds.registered
    }
}

/// A single key-material mutation reported by the protocol client.
#[derive(Debug, Clone)]
pub struct KeyChange {
    pub id: String,
    /// `None` removes the entry.
    pub material: Option<serde_json::Value>,
}

/// Loads and saves credential state through a storage adapter.
pub struct CredentialStore {
    adapter: Arc<dyn StorageAdapter>,
}

impl CredentialStore {
    pub fn new(adapter: Arc<dyn StorageAdapter>) -> Self {
        Self { adapter }
    }

    /// The adapter this store persists through.
    pub fn adapter(&self) -> Arc<dyn StorageAdapter> {
        self.adapter.clone()
    }

    /// Load the full bundle.
    ///
    /// An absent credentials key yields a fresh, unregistered bundle. Key
    /// entries that fail to deserialize are logged and skipped; a bad entry
    /// never aborts loading the rest.
    pub async fn load(&self) -> Result<CredentialBundle, StorageError> {
        let creds = match self.adapter.read(CREDS_KEY).await? {
            Some(data) => {
                serde_json::from_slice(&data).map_err(|e| StorageError::Serialization {
                    key: CREDS_KEY.to_string(),
                    reason: e.to_string(),
                })?
            }
            None => Creds::fresh(),
        };

        let mut keys = HashMap::new();
        for entry in self.adapter.list().await? {
            let Some(id) = key_id(&entry) else {
                continue;
            };
            let Some(data) = self.adapter.read(&entry).await? else {
                continue;
            };
            match serde_json::from_slice(&data) {
                Ok(material) => {
                    keys.insert(id.to_string(), material);
                }
                Err(e) => {
                    tracing::warn!("Skipping undecodable key entry {}: {}", entry, e);
                }
            }
        }

        Ok(CredentialBundle { creds, keys })
    }

    /// Serialize and write the registration record.
    pub async fn save_creds(&self, creds: &Creds) -> Result<(), StorageError> {
        let data = serde_json::to_vec(creds).map_err(|e| StorageError::Serialization {
            key: CREDS_KEY.to_string(),
            reason: e.to_string(),
        })?;
        self.adapter.write(CREDS_KEY, data.into()).await
    }

    /// Apply key-material changes, writing only the changed entries.
    pub async fn save_keys(&self, changes: &[KeyChange]) -> Result<(), StorageError> {
        for change in changes {
            let entry = format!("{}.json", change.id);
            match &change.material {
                Some(material) => {
                    let data =
                        serde_json::to_vec(material).map_err(|e| StorageError::Serialization {
                            key: entry.clone(),
                            reason: e.to_string(),
                        })?;
                    self.adapter.write(&entry, data.into()).await?;
                }
                None => self.adapter.remove(&entry).await?,
            }
        }
        Ok(())
    }

    /// Remove the session's entire credential footprint.
    pub async fn clear(&self) -> Result<(), StorageError> {
        for key in self.adapter.list().await? {
            self.adapter.remove(&key).await?;
        }
        Ok(())
    }
}

/// Key-material id for a stored entry, or `None` if the entry is outside the
/// key-material namespace (the credentials record, or not a `.json` blob).
fn key_id(entry: &str) -> Option<&str> {
    if entry == CREDS_KEY {
        return None;
    }
    entry.strip_suffix(".json")
}
