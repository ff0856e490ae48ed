//! Upload session repository.

use crate::error::MetadataResult;
use crate::models::UploadSessionRow;
use async_trait::async_trait;
use time::OffsetDateTime;

/// Repository for upload session operations.
#[async_trait]
pub trait UploadRepo: Send + Sync {
    /// Create a new upload session. Fails with `AlreadyExists` on a duplicate key.
    async fn create_session(&self, session: &UploadSessionRow) -> MetadataResult<()>;

    /// Get an upload session by key.
    async fn get_session(&self, upload_key: &str) -> MetadataResult<Option<UploadSessionRow>>;

    /// Record the destination of a session.
    ///
    /// The destination is write-once: setting the same value again is a no-op,
    /// a different value is a `Constraint` violation.
    async fn set_destination(
        &self,
        upload_key: &str,
        destination: &str,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Compare-and-set the offset of an open session.
    ///
    /// Returns false when the session is not open or its offset is no longer
    /// `expected_offset`.
    async fn advance_offset(
        &self,
        upload_key: &str,
        expected_offset: i64,
        new_offset: i64,
        updated_at: OffsetDateTime,
        expires_at: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Update session state.
    async fn update_state(
        &self,
        upload_key: &str,
        state: &str,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Delete a session. Deleting a missing session is not an error.
    async fn delete_session(&self, upload_key: &str) -> MetadataResult<()>;

    /// Sessions whose `expires_at` is before `now`, oldest first.
    async fn get_expired_sessions(
        &self,
        now: OffsetDateTime,
        limit: u32,
    ) -> MetadataResult<Vec<UploadSessionRow>>;
}
