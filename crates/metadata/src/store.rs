//! Metadata store trait and the SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{ObjectRepo, UploadRepo, UsageRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: UploadRepo + ObjectRepo + UsageRepo + Send + Sync {
    /// Create tables and indexes if missing.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`. `:memory:` is accepted.
    pub async fn new(
        path: impl AsRef<Path>,
        query_timeout_secs: Option<u64>,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let busy_timeout = Duration::from_secs(query_timeout_secs.unwrap_or(5));
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(busy_timeout);

        // One connection: writes serialize, and an in-memory database lives
        // exactly as long as that connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        tracing::debug!(path = %path.display(), "SQLite metadata store opened");
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

mod sqlite_impl {
    use super::*;
    use crate::error::is_unique_violation;
    use crate::models::*;
    use berth_core::UsageReference;
    use time::OffsetDateTime;
    use uuid::Uuid;

    #[async_trait]
    impl UploadRepo for SqliteStore {
        async fn create_session(&self, session: &UploadSessionRow) -> MetadataResult<()> {
            let result = sqlx::query(
                r#"
                INSERT INTO upload_sessions (
                    upload_key, metadata_header, destination, upload_length,
                    upload_offset, state, created_at, updated_at, expires_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&session.upload_key)
            .bind(&session.metadata_header)
            .bind(&session.destination)
            .bind(session.upload_length)
            .bind(session.upload_offset)
            .bind(&session.state)
            .bind(session.created_at)
            .bind(session.updated_at)
            .bind(session.expires_at)
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => Ok(()),
                Err(e) if is_unique_violation(&e) => Err(MetadataError::AlreadyExists(format!(
                    "upload session {}",
                    session.upload_key
                ))),
                Err(e) => Err(e.into()),
            }
        }

        async fn get_session(&self, upload_key: &str) -> MetadataResult<Option<UploadSessionRow>> {
            let row = sqlx::query_as::<_, UploadSessionRow>(
                "SELECT * FROM upload_sessions WHERE upload_key = ?",
            )
            .bind(upload_key)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn set_destination(
            &self,
            upload_key: &str,
            destination: &str,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            let result = sqlx::query(
                "UPDATE upload_sessions SET destination = ?, updated_at = ? \
                 WHERE upload_key = ? AND (destination IS NULL OR destination = ?)",
            )
            .bind(destination)
            .bind(updated_at)
            .bind(upload_key)
            .bind(destination)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() > 0 {
                return Ok(());
            }

            match self.get_session(upload_key).await? {
                None => Err(MetadataError::NotFound(format!(
                    "upload session {upload_key}"
                ))),
                Some(existing) => Err(MetadataError::Constraint(format!(
                    "destination of {upload_key} already set to {:?}",
                    existing.destination
                ))),
            }
        }

        async fn advance_offset(
            &self,
            upload_key: &str,
            expected_offset: i64,
            new_offset: i64,
            updated_at: OffsetDateTime,
            expires_at: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                "UPDATE upload_sessions SET upload_offset = ?, updated_at = ?, expires_at = ? \
                 WHERE upload_key = ? AND upload_offset = ? AND state = 'open'",
            )
            .bind(new_offset)
            .bind(updated_at)
            .bind(expires_at)
            .bind(upload_key)
            .bind(expected_offset)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn update_state(
            &self,
            upload_key: &str,
            state: &str,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            let result = sqlx::query(
                "UPDATE upload_sessions SET state = ?, updated_at = ? WHERE upload_key = ?",
            )
            .bind(state)
            .bind(updated_at)
            .bind(upload_key)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!(
                    "upload session {upload_key}"
                )));
            }
            Ok(())
        }

        async fn delete_session(&self, upload_key: &str) -> MetadataResult<()> {
            sqlx::query("DELETE FROM upload_sessions WHERE upload_key = ?")
                .bind(upload_key)
                .execute(&self.pool)
                .await?;
            Ok(())
        }

        async fn get_expired_sessions(
            &self,
            now: OffsetDateTime,
            limit: u32,
        ) -> MetadataResult<Vec<UploadSessionRow>> {
            let rows = sqlx::query_as::<_, UploadSessionRow>(
                "SELECT * FROM upload_sessions WHERE expires_at < ? ORDER BY expires_at LIMIT ?",
            )
            .bind(now)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl ObjectRepo for SqliteStore {
        async fn create_object_if_absent(
            &self,
            object: &StoredObjectRow,
        ) -> MetadataResult<(StoredObjectRow, bool)> {
            let result = sqlx::query(
                r#"
                INSERT INTO stored_objects (
                    object_id, uri, filename, mime_type, size_bytes, upload_key, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(uri) DO NOTHING
                "#,
            )
            .bind(object.object_id)
            .bind(&object.uri)
            .bind(&object.filename)
            .bind(&object.mime_type)
            .bind(object.size_bytes)
            .bind(&object.upload_key)
            .bind(object.created_at)
            .execute(&self.pool)
            .await?;
            let created = result.rows_affected() > 0;

            let stored = self.get_object_by_uri(&object.uri).await?.ok_or_else(|| {
                MetadataError::Internal(format!(
                    "stored object for {} vanished after insert",
                    object.uri
                ))
            })?;
            Ok((stored, created))
        }

        async fn get_object(&self, object_id: Uuid) -> MetadataResult<Option<StoredObjectRow>> {
            let row = sqlx::query_as::<_, StoredObjectRow>(
                "SELECT * FROM stored_objects WHERE object_id = ?",
            )
            .bind(object_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn get_object_by_uri(&self, uri: &str) -> MetadataResult<Option<StoredObjectRow>> {
            let row =
                sqlx::query_as::<_, StoredObjectRow>("SELECT * FROM stored_objects WHERE uri = ?")
                    .bind(uri)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row)
        }

        async fn get_objects_by_upload_key(
            &self,
            upload_key: &str,
        ) -> MetadataResult<Vec<StoredObjectRow>> {
            let rows = sqlx::query_as::<_, StoredObjectRow>(
                "SELECT * FROM stored_objects WHERE upload_key = ? ORDER BY created_at, uri",
            )
            .bind(upload_key)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl UsageRepo for SqliteStore {
        async fn add_usage(
            &self,
            usage: &UsageReference,
            now: OffsetDateTime,
        ) -> MetadataResult<i64> {
            let count: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO object_usage (
                    object_id, module, owner_type, owner_id, count, created_at, updated_at
                ) VALUES (?, ?, ?, ?, 1, ?, ?)
                ON CONFLICT(object_id, module, owner_type, owner_id)
                DO UPDATE SET count = count + 1, updated_at = excluded.updated_at
                RETURNING count
                "#,
            )
            .bind(usage.object_id)
            .bind(&usage.module)
            .bind(&usage.owner_type)
            .bind(&usage.owner_id)
            .bind(now)
            .bind(now)
            .fetch_one(&self.pool)
            .await?;
            Ok(count)
        }

        async fn list_usage(&self, object_id: Uuid) -> MetadataResult<Vec<ObjectUsageRow>> {
            let rows = sqlx::query_as::<_, ObjectUsageRow>(
                "SELECT * FROM object_usage WHERE object_id = ? \
                 ORDER BY module, owner_type, owner_id",
            )
            .bind(object_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }
}

const SCHEMA_SQL: &str = r#"
-- Live upload sessions, one row per upload key
CREATE TABLE IF NOT EXISTS upload_sessions (
    upload_key TEXT PRIMARY KEY,
    metadata_header TEXT NOT NULL,
    destination TEXT,
    upload_length INTEGER NOT NULL,
    upload_offset INTEGER NOT NULL DEFAULT 0,
    state TEXT NOT NULL DEFAULT 'open',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    expires_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_upload_sessions_expires ON upload_sessions(expires_at);

-- Finished uploads placed into managed storage
CREATE TABLE IF NOT EXISTS stored_objects (
    object_id BLOB PRIMARY KEY,
    uri TEXT NOT NULL UNIQUE,
    filename TEXT NOT NULL,
    mime_type TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    upload_key TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_stored_objects_upload_key ON stored_objects(upload_key);

-- Usage references keeping stored objects alive
CREATE TABLE IF NOT EXISTS object_usage (
    object_id BLOB NOT NULL REFERENCES stored_objects(object_id),
    module TEXT NOT NULL,
    owner_type TEXT NOT NULL,
    owner_id TEXT NOT NULL,
    count INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (object_id, module, owner_type, owner_id)
);
"#;
