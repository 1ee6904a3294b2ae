//! Session storage adapters.
//!
//! Everything the pairing flow persists goes through the [`StorageAdapter`]
//! contract: opaque string keys mapped to opaque byte blobs, with no ordering
//! or cross-key transactional guarantee. The credential store and the upload
//! pipeline are written against this trait only; backends are selected by
//! configuration and never leak their native APIs upward.

mod fs;
mod memory;
#[cfg(feature = "postgres")]
mod postgres;
mod s3;
mod scoped;

pub use fs::FsAdapter;
pub use memory::MemoryAdapter;
#[cfg(feature = "postgres")]
pub use postgres::PostgresAdapter;
pub use s3::S3Adapter;
pub use scoped::ScopedAdapter;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::config::{Config, S3Config, StorageBackend};
use crate::error::StorageError;

/// Uniform key/value-with-listing contract over a backing store.
///
/// `remove` is idempotent: removing an absent key succeeds. `write` to an
/// existing key overwrites it atomically from the caller's perspective.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Read the blob stored under `key`, or `None` if absent.
    async fn read(&self, key: &str) -> Result<Option<Bytes>, StorageError>;

    /// Write `value` under `key`, overwriting any existing blob.
    async fn write(&self, key: &str, value: Bytes) -> Result<(), StorageError>;

    /// Remove `key`. Succeeds if the key does not exist.
    async fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// List every existing key. Order is not significant.
    async fn list(&self) -> Result<Vec<String>, StorageError>;
}

/// Build a PostgreSQL connection pool from a connection string.
#[cfg(feature = "postgres")]
pub fn build_pool(database_url: &str) -> Result<deadpool_postgres::Pool, StorageError> {
    use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};

    let pg_config: tokio_postgres::Config = database_url.parse()?;
    let manager = Manager::from_config(
        pg_config,
        tokio_postgres::NoTls,
        ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        },
    );
    let pool = Pool::builder(manager).max_size(8).build()?;
    Ok(pool)
}

enum WorkingBackend {
    Memory,
    Fs { root: PathBuf },
    S3 { config: S3Config },
    #[cfg(feature = "postgres")]
    Postgres { pool: deadpool_postgres::Pool },
}

/// Builds adapters for the configured backends.
///
/// A fresh working adapter is handed out per pairing attempt (namespaced by
/// the flow key), while archive destinations are shared for the life of the
/// process so restore requests can find previously archived sessions.
pub struct StorageProvider {
    working: WorkingBackend,
    destinations: Vec<(String, Arc<dyn StorageAdapter>)>,
    http: reqwest::Client,
    #[cfg(feature = "postgres")]
    pool: Option<deadpool_postgres::Pool>,
}

impl StorageProvider {
    /// Construct a provider from configuration.
    pub fn from_config(config: &Config) -> Result<Self, StorageError> {
        let http = reqwest::Client::new();

        #[cfg(feature = "postgres")]
        let pool = match &config.database_url {
            Some(url) => Some(build_pool(url)?),
            None => None,
        };

        let working = match config.storage_backend {
            StorageBackend::Memory => WorkingBackend::Memory,
            StorageBackend::Fs => WorkingBackend::Fs {
                root: config.data_dir.clone(),
            },
            StorageBackend::S3 => WorkingBackend::S3 {
                config: s3_config(config)?,
            },
            #[cfg(feature = "postgres")]
            StorageBackend::Postgres => WorkingBackend::Postgres {
                pool: pool.clone().ok_or_else(|| StorageError::Backend {
                    reason: "postgres backend selected without a database URL".to_string(),
                })?,
            },
        };

        let mut destinations: Vec<(String, Arc<dyn StorageAdapter>)> = Vec::new();
        for backend in &config.archive_backends {
            let adapter: Arc<dyn StorageAdapter> = match backend {
                StorageBackend::Memory => Arc::new(MemoryAdapter::new()),
                StorageBackend::Fs => Arc::new(FsAdapter::new(config.archive_dir.clone())),
                StorageBackend::S3 => {
                    let cfg = s3_config(config)?;
                    let prefix = join_prefix(&cfg.key_prefix, "archives");
                    Arc::new(S3Adapter::new(http.clone(), cfg, prefix))
                }
                #[cfg(feature = "postgres")]
                StorageBackend::Postgres => {
                    let pool = pool.clone().ok_or_else(|| StorageError::Backend {
                        reason: "postgres archive selected without a database URL".to_string(),
                    })?;
                    Arc::new(PostgresAdapter::new(pool, "archives"))
                }
            };
            destinations.push((backend.to_string(), adapter));
        }

        Ok(Self {
            working,
            destinations,
            http,
            #[cfg(feature = "postgres")]
            pool,
        })
    }

    /// Provider backed entirely by in-memory maps. Used for development and
    /// in tests; working state and the archive both live in the process.
    pub fn in_memory() -> Self {
        Self {
            working: WorkingBackend::Memory,
            destinations: vec![("memory".to_string(), Arc::new(MemoryAdapter::new()))],
            http: reqwest::Client::new(),
            #[cfg(feature = "postgres")]
            pool: None,
        }
    }

    /// Memory-backed provider with caller-supplied archive destinations.
    #[cfg(test)]
    pub(crate) fn with_destinations(
        destinations: Vec<(String, Arc<dyn StorageAdapter>)>,
    ) -> Self {
        Self {
            working: WorkingBackend::Memory,
            destinations,
            http: reqwest::Client::new(),
            #[cfg(feature = "postgres")]
            pool: None,
        }
    }

    /// One-time backend preparation (schema setup for the database backend).
    pub async fn prepare(&self) -> Result<(), StorageError> {
        #[cfg(feature = "postgres")]
        if let Some(pool) = &self.pool {
            PostgresAdapter::new(pool.clone(), "startup")
                .ensure_schema()
                .await?;
        }
        Ok(())
    }

    /// Build a fresh working adapter for one pairing attempt.
    pub fn working_adapter(&self, flow_key: &str) -> Result<Arc<dyn StorageAdapter>, StorageError> {
        let adapter: Arc<dyn StorageAdapter> = match &self.working {
            WorkingBackend::Memory => Arc::new(MemoryAdapter::new()),
            WorkingBackend::Fs { root } => Arc::new(FsAdapter::new(root.join(flow_key))),
            WorkingBackend::S3 { config } => {
                let prefix = join_prefix(&config.key_prefix, &format!("sessions/{flow_key}"));
                Arc::new(S3Adapter::new(self.http.clone(), config.clone(), prefix))
            }
            #[cfg(feature = "postgres")]
            WorkingBackend::Postgres { pool } => {
                Arc::new(PostgresAdapter::new(pool.clone(), flow_key))
            }
        };
        Ok(adapter)
    }

    /// The configured archive destinations, in order.
    pub fn archive_adapters(&self) -> Vec<(String, Arc<dyn StorageAdapter>)> {
        self.destinations.clone()
    }

    /// View an archived session as a plain adapter, rooted at its session id
    /// inside the first archive destination.
    pub fn restore_adapter(
        &self,
        session_id: &str,
    ) -> Result<Arc<dyn StorageAdapter>, StorageError> {
        let (_, first) = self
            .destinations
            .first()
            .ok_or_else(|| StorageError::Backend {
                reason: "no archive destinations configured".to_string(),
            })?;
        Ok(Arc::new(ScopedAdapter::new(first.clone(), session_id)))
    }
}

fn s3_config(config: &Config) -> Result<S3Config, StorageError> {
    config.s3.clone().ok_or_else(|| StorageError::Backend {
        reason: "s3 backend selected without s3 configuration".to_string(),
    })
}

fn join_prefix(base: &str, rest: &str) -> String {
    let base = base.trim_matches('/');
    if base.is_empty() {
        rest.to_string()
    } else {
        format!("{base}/{rest}")
    }
}
