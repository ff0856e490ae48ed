//! Object usage repository.

use crate::error::MetadataResult;
use crate::models::ObjectUsageRow;
use async_trait::async_trait;
use berth_core::UsageReference;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for usage accounting. Additive only.
#[async_trait]
pub trait UsageRepo: Send + Sync {
    /// Record one use of the tuple, returning the new count.
    async fn add_usage(&self, usage: &UsageReference, now: OffsetDateTime) -> MetadataResult<i64>;

    /// All usage tuples for an object.
    async fn list_usage(&self, object_id: Uuid) -> MetadataResult<Vec<ObjectUsageRow>>;
}
