//! Database models mapping to the metadata schema.

use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Upload sessions
// =============================================================================

/// One live resumable upload.
#[derive(Debug, Clone, FromRow)]
pub struct UploadSessionRow {
    pub upload_key: String,
    /// Raw `Upload-Metadata` header as received at creation.
    pub metadata_header: String,
    /// `scheme://directory/upload_key`, set once before any chunk is written.
    pub destination: Option<String>,
    pub upload_length: i64,
    pub upload_offset: i64,
    pub state: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

// =============================================================================
// Stored objects
// =============================================================================

/// Persisted record of a finished upload. At most one per `uri`.
#[derive(Debug, Clone, FromRow)]
pub struct StoredObjectRow {
    pub object_id: Uuid,
    pub uri: String,
    pub filename: String,
    pub mime_type: String,
    pub size_bytes: i64,
    /// Upload key of the session that created the record.
    pub upload_key: String,
    pub created_at: OffsetDateTime,
}

// =============================================================================
// Usage
// =============================================================================

/// Usage tuple with its reference count.
#[derive(Debug, Clone, FromRow)]
pub struct ObjectUsageRow {
    pub object_id: Uuid,
    pub module: String,
    pub owner_type: String,
    pub owner_id: String,
    pub count: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}
