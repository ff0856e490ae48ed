//! Completion reconciliation.
//!
//! Once every byte of an upload has arrived, the reconciler re-validates the
//! metadata, moves the working file to its final URI and records exactly one
//! stored object for that URI. Repeated or concurrent completions of the same
//! upload converge on the same record.

use crate::ledger::UsageLedger;
use crate::metrics::{COMPLETION_DURATION, LEDGER_FAILURES, record_completion};
use berth_core::policy::{self, FieldPolicySource};
use berth_core::{
    CompletionResult, CompletionState, DEFAULT_MIME_TYPE, DestinationPath, Disposition, ObjectUri,
    UploadKey, UploadMetadata, UsageReference, sanitize_filename,
};
use berth_metadata::models::StoredObjectRow;
use berth_metadata::{MetadataError, MetadataStore};
use berth_storage::{SchemeRegistry, StorageError};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tokio::io::AsyncReadExt;
use uuid::Uuid;

/// Leading bytes inspected for content sniffing.
const SNIFF_LEN: usize = 8192;

/// Errors raised while completing an upload.
#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    /// The metadata violates the field policy. Nothing was placed.
    #[error("upload rejected: {0}")]
    Rejected(berth_core::Error),

    #[error("missing field info: {0}")]
    MissingFieldInfo(String),

    /// A record exists but its bytes do not, or the bytes vanished mid-flight.
    #[error("inconsistent state: {0}")]
    InconsistentState(String),

    #[error("invalid object location: {0}")]
    InvalidLocation(berth_core::Error),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("failed to read working file: {0}")]
    Io(#[from] std::io::Error),
}

impl CompletionError {
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

/// Result of a successful completion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CompletionOutcome {
    #[serde(flatten)]
    pub result: CompletionResult,
    pub disposition: Disposition,
    /// Non-fatal problems, such as a failed usage registration.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Reconciles finished uploads into stored objects.
#[derive(Clone)]
pub struct CompletionReconciler {
    policies: Arc<dyn FieldPolicySource>,
    metadata: Arc<dyn MetadataStore>,
    storage: SchemeRegistry,
    ledger: Arc<dyn UsageLedger>,
    owner_module: String,
}

impl CompletionReconciler {
    pub fn new(
        policies: Arc<dyn FieldPolicySource>,
        metadata: Arc<dyn MetadataStore>,
        storage: SchemeRegistry,
        ledger: Arc<dyn UsageLedger>,
        owner_module: impl Into<String>,
    ) -> Self {
        Self {
            policies,
            metadata,
            storage,
            ledger,
            owner_module: owner_module.into(),
        }
    }

    /// Complete the upload whose bytes sit in `working_file`.
    #[tracing::instrument(
        skip(self, metadata, working_file),
        fields(upload_key = %upload_key, destination = %destination)
    )]
    pub async fn complete(
        &self,
        upload_key: &UploadKey,
        destination: &DestinationPath,
        metadata: &UploadMetadata,
        working_file: &Path,
    ) -> Result<CompletionOutcome, CompletionError> {
        let start_time = Instant::now();
        let result = self
            .run(upload_key, destination, metadata, working_file)
            .await;
        COMPLETION_DURATION.observe(start_time.elapsed().as_secs_f64());

        match &result {
            Ok(outcome) => record_completion(outcome.disposition.as_str()),
            Err(e) if e.is_rejection() => {
                tracing::info!(error = %e, "Upload rejected at completion");
                record_completion("rejected");
            }
            Err(e @ CompletionError::InconsistentState(_)) => {
                tracing::error!(error = %e, "Stored object is inconsistent with storage");
                record_completion("failed");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Upload completion failed");
                record_completion("failed");
            }
        }
        result
    }

    async fn run(
        &self,
        upload_key: &UploadKey,
        destination: &DestinationPath,
        metadata: &UploadMetadata,
        working_file: &Path,
    ) -> Result<CompletionOutcome, CompletionError> {
        let mut state = CompletionState::Pending;

        // Pending -> Validated
        let field = policy::require_context(metadata).map_err(CompletionError::Rejected)?;
        let field_policy = self.policies.field_policy(&field).ok_or_else(|| {
            CompletionError::MissingFieldInfo(format!("no policy configured for field {field}"))
        })?;
        if let Err(e) = policy::validate(metadata, &field_policy) {
            transition(&mut state, CompletionState::Rejected);
            return Err(CompletionError::Rejected(e));
        }
        transition(&mut state, CompletionState::Validated);

        // Validated -> Resolved
        let filename = sanitize_filename(metadata.filename.as_deref(), upload_key);
        let uri = destination
            .object_uri(&filename)
            .map_err(CompletionError::InvalidLocation)?;
        let store = self.storage.store(&uri.scheme)?;
        transition(&mut state, CompletionState::Resolved);

        let (record, disposition) = match self.metadata.get_object_by_uri(&uri.to_string()).await? {
            Some(existing) => {
                if !store.exists(&uri.path).await? {
                    return Err(CompletionError::InconsistentState(format!(
                        "object {} is recorded but its bytes are missing from {uri}",
                        existing.object_id
                    )));
                }
                (existing, Disposition::Reused)
            }
            None => {
                let mime_type = sniff_mime_type(working_file)
                    .await?
                    .or_else(|| metadata.filetype.clone())
                    .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string());

                let size = match store.import_file(&uri.path, working_file).await {
                    Ok(size) => size,
                    Err(StorageError::NotFound(_)) => match store.head(&uri.path).await {
                        Ok(meta) => {
                            tracing::debug!(uri = %uri, "Working file already placed by a concurrent completion");
                            meta.size
                        }
                        Err(StorageError::NotFound(_)) => {
                            return Err(CompletionError::InconsistentState(format!(
                                "working file {} and destination {uri} are both missing",
                                working_file.display()
                            )));
                        }
                        Err(e) => return Err(e.into()),
                    },
                    Err(e) => return Err(e.into()),
                };

                let row = StoredObjectRow {
                    object_id: Uuid::new_v4(),
                    uri: uri.to_string(),
                    filename: filename.clone(),
                    mime_type,
                    size_bytes: i64::try_from(size).unwrap_or(i64::MAX),
                    upload_key: upload_key.to_string(),
                    created_at: OffsetDateTime::now_utc(),
                };
                let (stored, created) = self.metadata.create_object_if_absent(&row).await?;
                if created {
                    (stored, Disposition::Created)
                } else {
                    tracing::debug!(object_id = %stored.object_id, "Lost insert race, reusing record");
                    (stored, Disposition::Reused)
                }
            }
        };
        transition(&mut state, CompletionState::Committed);

        let mut warnings = Vec::new();
        let usage = UsageReference::provisional(record.object_id, &self.owner_module);
        if let Err(e) = self.ledger.register(&usage).await {
            LEDGER_FAILURES.inc();
            tracing::warn!(
                object_id = %record.object_id,
                error = %e,
                "Failed to register provisional usage"
            );
            warnings.push(e.to_string());
        }

        let result = self.to_result(&record)?;
        tracing::info!(
            object_id = %result.object_id,
            disposition = disposition.as_str(),
            uri = %record.uri,
            "Upload completed"
        );

        Ok(CompletionOutcome {
            result,
            disposition,
            warnings,
        })
    }

    /// Client-facing view of a stored record.
    pub fn to_result(&self, record: &StoredObjectRow) -> Result<CompletionResult, CompletionError> {
        let uri = ObjectUri::parse(&record.uri).map_err(CompletionError::InvalidLocation)?;
        Ok(CompletionResult {
            object_id: record.object_id,
            url: self.storage.public_url(&uri),
            mime_type: record.mime_type.clone(),
            filename: record.filename.clone(),
        })
    }
}

fn transition(state: &mut CompletionState, next: CompletionState) {
    match state.advance(next) {
        Some(advanced) => {
            tracing::trace!(from = ?state, to = ?advanced, "Completion state advanced");
            *state = advanced;
        }
        None => tracing::warn!(from = ?state, to = ?next, "Ignoring invalid completion transition"),
    }
}

/// Detect the MIME type from the working file's leading bytes.
///
/// A missing working file yields `None` rather than an error; the caller
/// decides whether the bytes were already placed.
async fn sniff_mime_type(path: &Path) -> Result<Option<String>, std::io::Error> {
    let mut file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let mut buf = vec![0u8; SNIFF_LEN];
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }

    Ok(infer::get(&buf[..filled]).map(|kind| kind.mime_type().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sniff_detects_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc");
        tokio::fs::write(&path, b"%PDF-1.4\n%test\n").await.unwrap();

        let mime = sniff_mime_type(&path).await.unwrap();
        assert_eq!(mime.as_deref(), Some("application/pdf"));
    }

    #[tokio::test]
    async fn test_sniff_unknown_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain");
        tokio::fs::write(&path, b"just some words").await.unwrap();

        assert_eq!(sniff_mime_type(&path).await.unwrap(), None);
        assert_eq!(
            sniff_mime_type(&dir.path().join("missing")).await.unwrap(),
            None
        );
    }
}
