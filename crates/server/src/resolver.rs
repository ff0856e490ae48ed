//! Destination resolution for new uploads.
//!
//! Turns decoded upload metadata into a `scheme://directory/upload_key` path
//! and makes sure the directory exists in the scheme's backend before the
//! first byte is written.

use berth_core::policy::{self, FieldKey, FieldPolicy, FieldPolicySource};
use berth_core::template::{self, Clock, TokenContext};
use berth_core::{DestinationPath, UploadKey, UploadMetadata};
use berth_storage::SchemeRegistry;
use std::sync::Arc;

/// Errors raised while resolving a destination.
#[derive(Debug, thiserror::Error)]
pub enum DestinationError {
    /// No metadata at all, or no policy configured for the named field.
    #[error("missing field info: {0}")]
    MissingFieldInfo(String),

    /// One of the required context keys is absent or empty.
    #[error(transparent)]
    IncompleteMetadata(berth_core::Error),

    /// The expanded template does not form a valid path.
    #[error("invalid destination for field {field}: {source}")]
    InvalidDirectory {
        field: FieldKey,
        source: berth_core::Error,
    },

    /// The directory could not be created or is not writable.
    #[error("destination {destination} is not writable: {reason}")]
    NotWritable { destination: String, reason: String },
}

/// Resolves upload destinations from field policies.
#[derive(Clone)]
pub struct DestinationResolver {
    policies: Arc<dyn FieldPolicySource>,
    storage: SchemeRegistry,
    clock: Arc<dyn Clock>,
}

impl DestinationResolver {
    pub fn new(
        policies: Arc<dyn FieldPolicySource>,
        storage: SchemeRegistry,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            policies,
            storage,
            clock,
        }
    }

    /// Field key and policy named by `metadata`.
    ///
    /// Checks the context keys before any lookup.
    pub fn policy_for(
        &self,
        metadata: &UploadMetadata,
    ) -> Result<(FieldKey, FieldPolicy), DestinationError> {
        if metadata.is_empty() {
            return Err(DestinationError::MissingFieldInfo(
                "upload carries no metadata".to_string(),
            ));
        }

        let field = policy::require_context(metadata).map_err(DestinationError::IncompleteMetadata)?;
        let policy = self.policies.field_policy(&field).ok_or_else(|| {
            DestinationError::MissingFieldInfo(format!("no policy configured for field {field}"))
        })?;
        Ok((field, policy))
    }

    /// Compute the destination without touching storage.
    pub fn plan(
        &self,
        upload_key: &UploadKey,
        metadata: &UploadMetadata,
    ) -> Result<DestinationPath, DestinationError> {
        let (field, policy) = self.policy_for(metadata)?;

        let ctx = TokenContext {
            now: self.clock.now(),
            entity_type: &field.entity_type,
            bundle: &field.bundle,
            field_name: &field.field_name,
        };
        let directory = template::expand(&policy.file_directory, &ctx);

        DestinationPath::new(&policy.uri_scheme, &directory, upload_key.clone())
            .map_err(|source| DestinationError::InvalidDirectory { field, source })
    }

    /// Compute the destination and ensure its directory is writable.
    #[tracing::instrument(skip(self, metadata), fields(upload_key = %upload_key))]
    pub async fn resolve(
        &self,
        upload_key: &UploadKey,
        metadata: &UploadMetadata,
    ) -> Result<DestinationPath, DestinationError> {
        let destination = self.plan(upload_key, metadata)?;

        let prepared = match self.storage.store(destination.scheme()) {
            Ok(store) => store.ensure_dir(&destination.path()).await,
            Err(e) => Err(e),
        };
        if let Err(e) = prepared {
            tracing::error!(
                destination = %destination,
                error = %e,
                "Upload destination is not writable"
            );
            return Err(DestinationError::NotWritable {
                destination: destination.to_string(),
                reason: e.to_string(),
            });
        }

        tracing::debug!(destination = %destination, "Upload destination resolved");
        Ok(destination)
    }
}
