//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("malformed upload metadata: {0}")]
    MalformedMetadata(String),

    #[error("required metadata fields not passed in: {}", .missing.join(", "))]
    IncompleteMetadata { missing: Vec<&'static str> },

    #[error("file type \"{extension}\" is not supported for this field")]
    UnsupportedFileType { extension: String },

    #[error("file size {size} exceeds the field limit of {max} bytes")]
    FileTooLarge { size: u64, max: u64 },

    #[error("invalid upload key: {0}")]
    InvalidUploadKey(String),

    #[error("invalid destination: {0}")]
    InvalidDestination(String),

    #[error("invalid filename: {0}")]
    InvalidFilename(String),

    #[error("invalid upload state: {0}")]
    InvalidState(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incomplete_metadata_lists_missing_keys() {
        let err = Error::IncompleteMetadata {
            missing: vec!["entityBundle", "filetype"],
        };
        assert_eq!(
            err.to_string(),
            "required metadata fields not passed in: entityBundle, filetype"
        );
    }
}
