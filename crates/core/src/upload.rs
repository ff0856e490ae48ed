//! Upload session types and lifecycle.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Maximum length of an upload key.
pub const MAX_UPLOAD_KEY_LEN: usize = 128;

/// Opaque, URL-safe identifier of one resumable upload.
///
/// Keys become a path segment of the destination directory, so only
/// `[A-Za-z0-9_-]` is accepted.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UploadKey(String);

impl UploadKey {
    /// Generate a new random upload key.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Parse a client- or server-supplied key.
    pub fn parse(s: &str) -> crate::Result<Self> {
        if s.is_empty() {
            return Err(crate::Error::InvalidUploadKey("empty key".to_string()));
        }
        if s.len() > MAX_UPLOAD_KEY_LEN {
            return Err(crate::Error::InvalidUploadKey(format!(
                "key is {} characters (max {MAX_UPLOAD_KEY_LEN})",
                s.len()
            )));
        }
        if let Some(c) = s
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(crate::Error::InvalidUploadKey(format!(
                "unexpected character {c:?}"
            )));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for UploadKey {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<String> for UploadKey {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(&value)
    }
}

impl From<UploadKey> for String {
    fn from(key: UploadKey) -> Self {
        key.0
    }
}

impl fmt::Debug for UploadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UploadKey({})", self.0)
    }
}

impl fmt::Display for UploadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Upload session state as persisted by the session store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadState {
    /// Session is accepting chunks.
    Open,
    /// All declared bytes arrived; reconciliation pending or retryable.
    Received,
    /// The completed upload failed the authoritative policy check.
    Rejected,
}

impl UploadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Received => "received",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "open" => Ok(Self::Open),
            "received" => Ok(Self::Received),
            "rejected" => Ok(Self::Rejected),
            other => Err(crate::Error::InvalidState(other.to_string())),
        }
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reconciliation progress of a completed upload.
///
/// `Pending -> Validated -> Resolved -> Committed`, or `Pending -> Rejected`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionState {
    Pending,
    Validated,
    Resolved,
    Committed,
    Rejected,
}

impl CompletionState {
    /// Advance to `next`, refusing transitions the state machine does not allow.
    pub fn advance(self, next: CompletionState) -> Option<CompletionState> {
        use CompletionState::*;
        match (self, next) {
            (Pending, Validated) | (Pending, Rejected) => Some(next),
            (Validated, Resolved) => Some(next),
            (Resolved, Committed) => Some(next),
            _ => None,
        }
    }
}

/// Whether completion created a new stored object or reused an existing one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    Created,
    Reused,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Reused => "reused",
        }
    }
}

/// Result payload returned to clients once an upload is committed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionResult {
    /// Stored object identifier.
    pub object_id: Uuid,
    /// Public-facing path or URL of the stored object.
    pub url: String,
    /// MIME type recorded for the object.
    pub mime_type: String,
    /// Declared filename.
    pub filename: String,
}
