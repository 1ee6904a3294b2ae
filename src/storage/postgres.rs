//! PostgreSQL storage adapter.
//!
//! Session blobs are rows in a single `session_blobs` table keyed by
//! `(session_key, blob_key)`; each adapter instance is bound to one
//! `session_key`, so `list` only ever sees its own session.

use async_trait::async_trait;
use bytes::Bytes;
use deadpool_postgres::Pool;

use crate::error::StorageError;
use crate::storage::StorageAdapter;

/// Adapter storing blobs as rows in a PostgreSQL table.
#[derive(Clone)]
pub struct PostgresAdapter {
    pool: Pool,
    session_key: String,
}

impl PostgresAdapter {
    /// Create an adapter bound to `session_key`.
    pub fn new(pool: Pool, session_key: impl Into<String>) -> Self {
        Self {
            pool,
            session_key: session_key.into(),
        }
    }

    /// Create the blob table if it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), StorageError> {
        let conn = self.conn().await?;
        conn.batch_execute(
            r#"
            CREATE TABLE IF NOT EXISTS session_blobs (
                session_key TEXT NOT NULL,
                blob_key    TEXT NOT NULL,
                data        BYTEA NOT NULL,
                updated_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (session_key, blob_key)
            )
            "#,
        )
        .await?;
        Ok(())
    }

    async fn conn(&self) -> Result<deadpool_postgres::Object, StorageError> {
        Ok(self.pool.get().await?)
    }
}

#[async_trait]
impl StorageAdapter for PostgresAdapter {
    async fn read(&self, key: &str) -> Result<Option<Bytes>, StorageError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                "SELECT data FROM session_blobs WHERE session_key = $1 AND blob_key = $2",
                &[&self.session_key, &key],
            )
            .await?;
        Ok(row.map(|r| Bytes::from(r.get::<_, Vec<u8>>(0))))
    }

    async fn write(&self, key: &str, value: Bytes) -> Result<(), StorageError> {
        let conn = self.conn().await?;
        let data: &[u8] = value.as_ref();
        conn.execute(
            r#"
            INSERT INTO session_blobs (session_key, blob_key, data, updated_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (session_key, blob_key)
            DO UPDATE SET data = EXCLUDED.data, updated_at = now()
            "#,
            &[&self.session_key, &key, &data],
        )
        .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let conn = self.conn().await?;
        conn.execute(
            "DELETE FROM session_blobs WHERE session_key = $1 AND blob_key = $2",
            &[&self.session_key, &key],
        )
        .await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, StorageError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                "SELECT blob_key FROM session_blobs WHERE session_key = $1",
                &[&self.session_key],
            )
            .await?;
        Ok(rows.into_iter().map(|r| r.get(0)).collect())
    }
}
