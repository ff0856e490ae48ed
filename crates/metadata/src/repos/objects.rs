//! Stored object repository.

use crate::error::MetadataResult;
use crate::models::StoredObjectRow;
use async_trait::async_trait;
use uuid::Uuid;

/// Repository for stored object records.
#[async_trait]
pub trait ObjectRepo: Send + Sync {
    /// Insert `object` unless a record with the same URI exists.
    ///
    /// Returns the record now stored for that URI and whether this call
    /// created it. A caller that loses a concurrent insert gets the winner's
    /// record with `false`.
    async fn create_object_if_absent(
        &self,
        object: &StoredObjectRow,
    ) -> MetadataResult<(StoredObjectRow, bool)>;

    async fn get_object(&self, object_id: Uuid) -> MetadataResult<Option<StoredObjectRow>>;

    async fn get_object_by_uri(&self, uri: &str) -> MetadataResult<Option<StoredObjectRow>>;

    /// Records created by the session with `upload_key`, oldest first.
    async fn get_objects_by_upload_key(
        &self,
        upload_key: &str,
    ) -> MetadataResult<Vec<StoredObjectRow>>;
}
