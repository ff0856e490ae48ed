//! Object storage abstraction and backends for berth.
//!
//! This crate provides:
//! - The `ObjectStore` trait with file import into place
//! - Directory provisioning with writability checks
//! - A local filesystem backend
//! - A registry mapping URI schemes to stores

pub mod backends;
pub mod error;
pub mod registry;
pub mod traits;

pub use backends::filesystem::FilesystemBackend;
pub use error::{StorageError, StorageResult};
pub use registry::{SchemeRegistry, SchemeStore};
pub use traits::{ObjectMeta, ObjectStore};
