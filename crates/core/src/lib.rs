//! Core domain types and shared logic for berth.
//!
//! This crate defines the data model used across all other crates:
//! - Upload keys and session lifecycle
//! - The `Upload-Metadata` codec
//! - Field policies and upload validation
//! - Destination paths and directory templates
//! - Usage references

pub mod config;
pub mod destination;
pub mod error;
pub mod metadata;
pub mod policy;
pub mod template;
pub mod upload;
pub mod usage;

pub use destination::{DestinationPath, ObjectUri, sanitize_filename};
pub use error::{Error, Result};
pub use metadata::UploadMetadata;
pub use policy::{FieldKey, FieldPolicy, FieldPolicySource, StaticFieldPolicies};
pub use template::{Clock, FixedClock, SystemClock, TokenContext};
pub use upload::{CompletionResult, CompletionState, Disposition, UploadKey, UploadState};
pub use usage::{PENDING_OWNER_TYPE, UsageReference};

/// tus protocol version implemented by the transfer engine.
pub const TUS_VERSION: &str = "1.0.0";

/// MIME type used when neither sniffing nor the client yields one.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";
