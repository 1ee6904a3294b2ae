//! Session archival.
//!
//! When a pairing flow reaches the linked state, everything in the working
//! adapter is exported to the configured long-term destinations under a
//! freshly minted session identifier. Destination writes are independent per
//! key; one failure never stops the remaining keys.

use std::sync::Arc;

use rand::Rng;

use crate::error::{StorageError, UploadError};
use crate::storage::{ScopedAdapter, StorageAdapter};

const ID_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// One long-term archive target.
pub struct ArchiveDestination {
    pub name: String,
    pub adapter: Arc<dyn StorageAdapter>,
}

/// A single upload that did not make it.
#[derive(Debug, Clone)]
pub struct FailedUpload {
    pub destination: String,
    pub key: String,
    pub reason: String,
}

/// Result of archiving one session.
#[derive(Debug, Clone)]
pub struct ArchiveOutcome {
    /// The minted identifier the session was archived under.
    pub session_id: String,
    /// Uploads that failed on some destination. Non-empty outcomes are
    /// surfaced to operators as warnings, never silently dropped.
    pub failed: Vec<FailedUpload>,
}

impl ArchiveOutcome {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Exports a session's blobs to the archive destinations.
pub struct UploadPipeline {
    destinations: Vec<ArchiveDestination>,
    session_prefix: String,
}

impl UploadPipeline {
    pub fn new(destinations: Vec<ArchiveDestination>, session_prefix: impl Into<String>) -> Self {
        Self {
            destinations,
            session_prefix: session_prefix.into(),
        }
    }

    /// Archive everything currently in `source` under a fresh session id.
    ///
    /// The id is only returned once at least one destination has accepted
    /// the full set of keys that were readable from the source; otherwise an
    /// aggregate error names the keys that failed.
    pub async fn archive(&self, source: &dyn StorageAdapter) -> Result<ArchiveOutcome, UploadError> {
        if self.destinations.is_empty() {
            return Err(UploadError::NoDestinations);
        }

        let session_id = mint_session_id(&self.session_prefix);
        let keys = source.list().await?;
        tracing::info!(
            "Archiving {} blobs as session {}",
            keys.len(),
            session_id
        );

        let mut blobs: Vec<(String, bytes::Bytes)> = Vec::with_capacity(keys.len());
        let mut failed: Vec<FailedUpload> = Vec::new();
        for key in keys {
            match source.read(&key).await {
                Ok(Some(data)) => blobs.push((key, data)),
                // Removed between list and read; nothing to archive.
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("Could not read {} for archival: {}", key, e);
                    failed.push(FailedUpload {
                        destination: "source".to_string(),
                        key,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let mut uploads = Vec::with_capacity(self.destinations.len());
        let blobs_ref = &blobs;
        for dest in &self.destinations {
            let scope = ScopedAdapter::new(dest.adapter.clone(), session_id.as_str());
            let name = dest.name.clone();
            uploads.push(async move {
                let mut dest_failed: Vec<FailedUpload> = Vec::new();
                for (key, data) in blobs_ref {
                    if let Err(e) = write_with_retry(&scope, key, data.clone()).await {
                        tracing::warn!("Upload of {} to {} failed: {}", key, name, e);
                        dest_failed.push(FailedUpload {
                            destination: name.clone(),
                            key: key.clone(),
                            reason: e.to_string(),
                        });
                    }
                }
                dest_failed
            });
        }
        let results = futures::future::join_all(uploads).await;

        let full_set_accepted = results.iter().any(Vec::is_empty);
        for dest_failed in results {
            failed.extend(dest_failed);
        }

        if !full_set_accepted {
            let mut failed_keys: Vec<String> = failed.iter().map(|f| f.key.clone()).collect();
            failed_keys.sort();
            failed_keys.dedup();
            return Err(UploadError::NoDestinationAccepted {
                session_id,
                failed_keys,
            });
        }

        Ok(ArchiveOutcome { session_id, failed })
    }
}

/// Write one blob, retrying once on failure.
async fn write_with_retry(
    scope: &ScopedAdapter,
    key: &str,
    data: bytes::Bytes,
) -> Result<(), StorageError> {
    match scope.write(key, data.clone()).await {
        Ok(()) => Ok(()),
        Err(first) => {
            tracing::debug!("Retrying upload of {} after: {}", key, first);
            scope.write(key, data).await
        }
    }
}

/// Mint a session identifier: configured prefix, millisecond timestamp in
/// base36, and a random suffix so same-millisecond mints stay distinct.
pub fn mint_session_id(prefix: &str) -> String {
    let millis = chrono::Utc::now().timestamp_millis().unsigned_abs();
    format!("{}{}{}", prefix, base36(millis), random_suffix(6))
}

fn base36(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while n > 0 {
        digits.push(ID_ALPHABET[(n % 36) as usize]);
        n /= 36;
    }
    digits.reverse();
    String::from_utf8(digits).unwrap_or_default()
}

fn random_suffix(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryAdapter;
    use async_trait::async_trait;
    use bytes::Bytes;

    /// Adapter whose writes always fail.
    struct RejectingAdapter;

    #[async_trait]
    impl StorageAdapter for RejectingAdapter {
        async fn read(&self, _key: &str) -> Result<Option<Bytes>, StorageError> {
            Ok(None)
        }

        async fn write(&self, key: &str, _value: Bytes) -> Result<(), StorageError> {
            Err(StorageError::Write {
                key: key.to_string(),
                reason: "bucket unavailable".to_string(),
            })
        }

        async fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Ok(())
        }

        async fn list(&self) -> Result<Vec<String>, StorageError> {
            Ok(Vec::new())
        }
    }

    async fn seeded_source() -> MemoryAdapter {
        let source = MemoryAdapter::new();
        source
            .write("creds.json", Bytes::from_static(b"b1"))
            .await
            .unwrap();
        source
            .write("key-1.json", Bytes::from_static(b"b2"))
            .await
            .unwrap();
        source
    }

    #[tokio::test]
    async fn test_archive_places_every_blob_under_the_minted_id() {
        let source = seeded_source().await;
        let dest = Arc::new(MemoryAdapter::new());
        let pipeline = UploadPipeline::new(
            vec![ArchiveDestination {
                name: "memory".to_string(),
                adapter: dest.clone(),
            }],
            "GATE~",
        );

        let outcome = pipeline.archive(&source).await.unwrap();
        assert!(outcome.is_clean());
        assert!(outcome.session_id.starts_with("GATE~"));

        let sid = &outcome.session_id;
        assert_eq!(
            dest.read(&format!("{sid}/creds.json")).await.unwrap(),
            Some(Bytes::from_static(b"b1"))
        );
        assert_eq!(
            dest.read(&format!("{sid}/key-1.json")).await.unwrap(),
            Some(Bytes::from_static(b"b2"))
        );
    }

    #[tokio::test]
    async fn test_one_failing_destination_is_a_warning_not_an_error() {
        let source = seeded_source().await;
        let good = Arc::new(MemoryAdapter::new());
        let pipeline = UploadPipeline::new(
            vec![
                ArchiveDestination {
                    name: "s3".to_string(),
                    adapter: Arc::new(RejectingAdapter),
                },
                ArchiveDestination {
                    name: "memory".to_string(),
                    adapter: good.clone(),
                },
            ],
            "GATE~",
        );

        let outcome = pipeline.archive(&source).await.unwrap();
        assert_eq!(outcome.failed.len(), 2);
        assert!(outcome.failed.iter().all(|f| f.destination == "s3"));
        assert_eq!(good.len().await, 2);
    }

    #[tokio::test]
    async fn test_no_destination_accepting_is_an_aggregate_error() {
        let source = seeded_source().await;
        let pipeline = UploadPipeline::new(
            vec![ArchiveDestination {
                name: "s3".to_string(),
                adapter: Arc::new(RejectingAdapter),
            }],
            "GATE~",
        );

        let err = pipeline.archive(&source).await.unwrap_err();
        match err {
            UploadError::NoDestinationAccepted { failed_keys, .. } => {
                assert_eq!(failed_keys, vec!["creds.json", "key-1.json"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_no_destinations_configured_is_an_error() {
        let source = seeded_source().await;
        let pipeline = UploadPipeline::new(Vec::new(), "GATE~");
        assert!(matches!(
            pipeline.archive(&source).await,
            Err(UploadError::NoDestinations)
        ));
    }

    #[test]
    fn test_minted_ids_carry_the_prefix_and_differ() {
        let a = mint_session_id("GATE~");
        let b = mint_session_id("GATE~");
        assert!(a.starts_with("GATE~"));
        assert!(a.len() > "GATE~".len() + 6);
        assert_ne!(a, b);
    }

    #[test]
    fn test_base36_encoding() {
        assert_eq!(base36(0), "0");
        assert_eq!(base36(35), "Z");
        assert_eq!(base36(36), "10");
    }
}
