//! Repository traits for metadata operations.

pub mod objects;
pub mod uploads;
pub mod usage;

pub use objects::ObjectRepo;
pub use uploads::UploadRepo;
pub use usage::UsageRepo;
