//! API error types.

use crate::reconciler::CompletionError;
use crate::resolver::DestinationError;
use crate::tus::TransferError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("unsupported tus version: {0}")]
    UnsupportedVersion(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("storage error: {0}")]
    Storage(#[from] berth_storage::StorageError),

    #[error("metadata error: {0}")]
    Metadata(#[from] berth_metadata::MetadataError),

    #[error(transparent)]
    Core(#[from] berth_core::Error),
}

impl From<CompletionError> for ApiError {
    fn from(e: CompletionError) -> Self {
        Self::Transfer(TransferError::Completion(e))
    }
}

impl From<DestinationError> for ApiError {
    fn from(e: DestinationError) -> Self {
        Self::Transfer(TransferError::Destination(e))
    }
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        self.classify().1
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        self.classify().0
    }

    fn classify(&self) -> (StatusCode, &'static str) {
        match self {
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            Self::UnsupportedMediaType(_) => {
                (StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported_media_type")
            }
            Self::UnsupportedVersion(_) => {
                (StatusCode::PRECONDITION_FAILED, "unsupported_version")
            }
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            Self::Transfer(e) => classify_transfer(e),
            Self::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
            Self::Metadata(_) => (StatusCode::INTERNAL_SERVER_ERROR, "metadata_error"),
            Self::Core(e) => classify_core(e),
        }
    }
}

fn classify_transfer(e: &TransferError) -> (StatusCode, &'static str) {
    match e {
        TransferError::NotFound(_) => (StatusCode::NOT_FOUND, "upload_not_found"),
        TransferError::Expired(_) => (StatusCode::GONE, "upload_expired"),
        TransferError::AlreadyExists(_) => (StatusCode::CONFLICT, "upload_exists"),
        TransferError::SessionClosed { .. } => (StatusCode::CONFLICT, "session_closed"),
        TransferError::Busy(_) => (StatusCode::LOCKED, "session_busy"),
        TransferError::OffsetMismatch { .. } => (StatusCode::CONFLICT, "offset_mismatch"),
        TransferError::ExceedsLength { .. } => {
            (StatusCode::PAYLOAD_TOO_LARGE, "exceeds_upload_length")
        }
        TransferError::TooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, "upload_too_large"),
        TransferError::Incomplete { .. } => (StatusCode::CONFLICT, "upload_incomplete"),
        TransferError::InconsistentState(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "inconsistent_state")
        }
        TransferError::Core(e) => classify_core(e),
        TransferError::Destination(e) => classify_destination(e),
        TransferError::Completion(e) => classify_completion(e),
        TransferError::Metadata(_) => (StatusCode::INTERNAL_SERVER_ERROR, "metadata_error"),
        TransferError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
        TransferError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "io_error"),
    }
}

/// Core errors as raised while starting a session.
fn classify_core(e: &berth_core::Error) -> (StatusCode, &'static str) {
    use berth_core::Error;
    match e {
        Error::MalformedMetadata(_) => (StatusCode::BAD_REQUEST, "malformed_metadata"),
        Error::InvalidUploadKey(_) => (StatusCode::BAD_REQUEST, "invalid_upload_key"),
        Error::IncompleteMetadata { .. } => {
            (StatusCode::UNPROCESSABLE_ENTITY, "incomplete_metadata")
        }
        Error::UnsupportedFileType { .. } => {
            (StatusCode::UNPROCESSABLE_ENTITY, "unsupported_file_type")
        }
        Error::FileTooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, "file_too_large"),
        Error::InvalidDestination(_) => (StatusCode::INTERNAL_SERVER_ERROR, "invalid_destination"),
        Error::InvalidFilename(_) => (StatusCode::INTERNAL_SERVER_ERROR, "invalid_filename"),
        Error::InvalidState(_) => (StatusCode::INTERNAL_SERVER_ERROR, "inconsistent_state"),
    }
}

fn classify_destination(e: &DestinationError) -> (StatusCode, &'static str) {
    match e {
        DestinationError::MissingFieldInfo(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "missing_field_info")
        }
        DestinationError::IncompleteMetadata(e) => classify_core(e),
        DestinationError::InvalidDirectory { .. } => {
            (StatusCode::INTERNAL_SERVER_ERROR, "invalid_destination")
        }
        DestinationError::NotWritable { .. } => {
            (StatusCode::INTERNAL_SERVER_ERROR, "destination_not_writable")
        }
    }
}

fn classify_completion(e: &CompletionError) -> (StatusCode, &'static str) {
    match e {
        // Already enforced at session start.
        CompletionError::Rejected(berth_core::Error::IncompleteMetadata { .. }) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "incomplete_metadata")
        }
        CompletionError::Rejected(e) => classify_core(e),
        CompletionError::MissingFieldInfo(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "missing_field_info")
        }
        CompletionError::InconsistentState(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "inconsistent_state")
        }
        CompletionError::InvalidLocation(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "invalid_destination")
        }
        CompletionError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
        CompletionError::Metadata(_) => (StatusCode::INTERNAL_SERVER_ERROR, "metadata_error"),
        CompletionError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "io_error"),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_start_errors() {
        let malformed = ApiError::from(berth_core::Error::MalformedMetadata("x".into()));
        assert_eq!(malformed.status_code(), StatusCode::BAD_REQUEST);

        let incomplete = ApiError::from(TransferError::Core(
            berth_core::Error::IncompleteMetadata {
                missing: vec!["entityType"],
            },
        ));
        assert_eq!(incomplete.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(incomplete.code(), "incomplete_metadata");

        let unwritable = ApiError::from(DestinationError::NotWritable {
            destination: "public://a/b".into(),
            reason: "denied".into(),
        });
        assert_eq!(unwritable.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(unwritable.code(), "destination_not_writable");
    }

    #[test]
    fn test_completion_errors() {
        let incomplete = ApiError::from(CompletionError::Rejected(
            berth_core::Error::IncompleteMetadata {
                missing: vec!["filetype"],
            },
        ));
        assert_eq!(incomplete.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        let unsupported = ApiError::from(CompletionError::Rejected(
            berth_core::Error::UnsupportedFileType {
                extension: "exe".into(),
            },
        ));
        assert_eq!(unsupported.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(unsupported.code(), "unsupported_file_type");

        let stale = ApiError::from(CompletionError::InconsistentState("gone".into()));
        assert_eq!(stale.code(), "inconsistent_state");
    }

    #[test]
    fn test_transfer_errors() {
        let mismatch = ApiError::from(TransferError::OffsetMismatch {
            expected: 10,
            actual: 4,
        });
        assert_eq!(mismatch.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::from(TransferError::NotFound("k".into())).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(TransferError::TooLarge { length: 2, max: 1 }).status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }
}
