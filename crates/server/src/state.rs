//! Application state shared across handlers.

use crate::ledger::{MetadataLedger, UsageLedger};
use crate::reconciler::CompletionReconciler;
use crate::resolver::DestinationResolver;
use crate::tus::{TransferEngine, TransferLimits};
use berth_core::config::AppConfig;
use berth_core::{Clock, SystemClock};
use berth_metadata::MetadataStore;
use berth_storage::SchemeRegistry;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Object stores by URI scheme.
    pub storage: SchemeRegistry,
    /// Metadata store.
    pub metadata: Arc<dyn MetadataStore>,
    /// tus session lifecycle.
    pub engine: TransferEngine,
}

impl AppState {
    /// Wire the engine with the wall clock and the metadata-backed ledger.
    pub fn new(
        config: AppConfig,
        storage: SchemeRegistry,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        let ledger = Arc::new(MetadataLedger::new(metadata.clone()));
        Self::with_components(config, storage, metadata, Arc::new(SystemClock), ledger)
    }

    /// Wire the engine with an explicit clock and ledger.
    pub fn with_components(
        config: AppConfig,
        storage: SchemeRegistry,
        metadata: Arc<dyn MetadataStore>,
        clock: Arc<dyn Clock>,
        ledger: Arc<dyn UsageLedger>,
    ) -> Self {
        let policies = Arc::new(config.field_policies());
        let resolver = DestinationResolver::new(policies.clone(), storage.clone(), clock);
        let reconciler = CompletionReconciler::new(
            policies,
            metadata.clone(),
            storage.clone(),
            ledger,
            config.server.usage_module.clone(),
        );
        let engine = TransferEngine::new(
            metadata.clone(),
            resolver,
            reconciler,
            config.uploads.cache_dir.clone(),
            TransferLimits {
                max_upload_size: config.server.max_upload_size,
                session_expiry: config.server.session_expiry(),
            },
        );

        Self {
            config: Arc::new(config),
            storage,
            metadata,
            engine,
        }
    }
}
