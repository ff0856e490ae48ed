//! HTTP server for berth resumable uploads.
//!
//! This crate provides:
//! - The tus transfer engine and its HTTP surface
//! - Destination resolution from field policies
//! - Completion reconciliation into stored objects
//! - The usage ledger adapter
//! - Background expiry of abandoned sessions

pub mod error;
pub mod handlers;
pub mod ledger;
pub mod metrics;
pub mod reconciler;
pub mod resolver;
pub mod routes;
pub mod state;
pub mod sweep;
pub mod tus;

pub use error::ApiError;
pub use ledger::{LedgerError, MetadataLedger, UsageLedger};
pub use reconciler::{CompletionError, CompletionOutcome, CompletionReconciler};
pub use resolver::{DestinationError, DestinationResolver};
pub use routes::create_router;
pub use state::AppState;
pub use tus::{SessionInfo, TransferEngine, TransferError, TransferLimits, WriteOutcome};
