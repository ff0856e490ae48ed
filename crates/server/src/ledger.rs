//! Usage ledger adapter.

use async_trait::async_trait;
use berth_core::UsageReference;
use berth_metadata::{MetadataError, MetadataStore};
use std::sync::Arc;
use time::OffsetDateTime;

/// Failure to record a usage reference.
#[derive(Debug, thiserror::Error)]
#[error("usage registration failed: {0}")]
pub struct LedgerError(#[from] pub MetadataError);

/// Records that an owner uses a stored object.
///
/// Registration is additive: the same tuple registered twice counts twice.
#[async_trait]
pub trait UsageLedger: Send + Sync {
    async fn register(&self, usage: &UsageReference) -> Result<(), LedgerError>;
}

/// Ledger backed by the metadata store's `object_usage` table.
#[derive(Clone)]
pub struct MetadataLedger {
    metadata: Arc<dyn MetadataStore>,
}

impl MetadataLedger {
    pub fn new(metadata: Arc<dyn MetadataStore>) -> Self {
        Self { metadata }
    }
}

#[async_trait]
impl UsageLedger for MetadataLedger {
    async fn register(&self, usage: &UsageReference) -> Result<(), LedgerError> {
        let count = self
            .metadata
            .add_usage(usage, OffsetDateTime::now_utc())
            .await?;
        tracing::debug!(
            object_id = %usage.object_id,
            module = %usage.module,
            owner_type = %usage.owner_type,
            count,
            "Usage registered"
        );
        Ok(())
    }
}
