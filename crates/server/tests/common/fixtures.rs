//! Test fixtures for generating test data.

use async_trait::async_trait;
use berth_core::config::FieldConfig;
use berth_core::{FixedClock, UploadMetadata, UsageReference};
use berth_metadata::MetadataError;
use berth_server::{LedgerError, UsageLedger};
use bytes::Bytes;
use time::macros::datetime;

/// Generate deterministic test data based on a seed.
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    for chunk in data.chunks_mut(8) {
        // Simple LCG for deterministic data
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}

/// A PDF-looking payload of `len` bytes (at least the header).
#[allow(dead_code)]
pub fn pdf_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = b"%PDF-1.4\n".to_vec();
    data.extend_from_slice(&seeded_bytes(seed, len.saturating_sub(data.len())));
    Bytes::from(data)
}

/// Instant all test clocks are pinned to; templates expand to `2024-03`.
#[allow(dead_code)]
pub fn fixed_clock() -> FixedClock {
    FixedClock(datetime!(2024-03-05 10:00 UTC))
}

/// The `healthcare.clinic.file` field: txt/pdf/doc under `YYYY-MM`.
#[allow(dead_code)]
pub fn clinic_field() -> FieldConfig {
    FieldConfig {
        entity_type: "healthcare".to_string(),
        bundle: "clinic".to_string(),
        field_name: "file".to_string(),
        file_extensions: "txt pdf doc".to_string(),
        uri_scheme: "public".to_string(),
        file_directory: "[date:custom:Y]-[date:custom:m]".to_string(),
        max_filesize: Some(10 * 1024 * 1024),
    }
}

/// Metadata for an upload to `healthcare.clinic.file`.
#[allow(dead_code)]
pub fn clinic_metadata(filename: Option<&str>, filetype: &str) -> UploadMetadata {
    UploadMetadata {
        entity_type: Some("healthcare".to_string()),
        entity_bundle: Some("clinic".to_string()),
        field_name: Some("file".to_string()),
        filetype: Some(filetype.to_string()),
        filename: filename.map(str::to_string),
        size: None,
    }
}

/// Ledger that always fails.
#[allow(dead_code)]
pub struct FailingLedger;

#[async_trait]
impl UsageLedger for FailingLedger {
    async fn register(&self, _usage: &UsageReference) -> Result<(), LedgerError> {
        Err(LedgerError(MetadataError::Internal(
            "ledger unavailable".to_string(),
        )))
    }
}

/// Ledger that parks every registration until released.
#[allow(dead_code)]
#[derive(Default)]
pub struct GatedLedger {
    pub entered: tokio::sync::Notify,
    pub release: tokio::sync::Notify,
}

#[async_trait]
impl UsageLedger for GatedLedger {
    async fn register(&self, _usage: &UsageReference) -> Result<(), LedgerError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(())
    }
}
