//! Storage trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use std::path::Path;

/// Object store rooted at one URI scheme.
///
/// Keys are `/`-separated paths relative to the scheme root, e.g.
/// `2024/03/abc/report.pdf`.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Check if an object exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Get an object's size without fetching content.
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta>;

    /// Create the directory `prefix` (and its parents) and check it is writable.
    ///
    /// A directory that already exists is not an error.
    async fn ensure_dir(&self, prefix: &str) -> StorageResult<()>;

    /// Move a local file into the store under `key`, returning its size.
    ///
    /// Fails with `NotFound` when `source` does not exist.
    async fn import_file(&self, key: &str, source: &Path) -> StorageResult<u64>;

    /// Get the name of this storage backend.
    ///
    /// Used for metrics and logging.
    fn backend_name(&self) -> &'static str;

    /// Check that the backend is reachable and correctly configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is not reachable or misconfigured.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Metadata about a stored object.
#[derive(Clone, Debug)]
pub struct ObjectMeta {
    /// Object size in bytes.
    pub size: u64,
    /// Last modification time (if available).
    pub last_modified: Option<time::OffsetDateTime>,
}
