//! Server test utilities.

use crate::common::fixtures::{clinic_field, fixed_clock};
use berth_core::config::AppConfig;
use berth_metadata::{MetadataStore, SqliteStore};
use berth_server::{AppState, MetadataLedger, UsageLedger, create_router};
use berth_storage::SchemeRegistry;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a test server with the clinic field configured.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        Self::build(modifier, None).await
    }

    /// Create a test server whose reconciler uses `ledger`.
    pub async fn with_ledger(ledger: Arc<dyn UsageLedger>) -> Self {
        Self::build(|_| {}, Some(ledger)).await
    }

    async fn build<F>(modifier: F, ledger: Option<Arc<dyn UsageLedger>>) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        let mut config = AppConfig::for_testing(temp_dir.path());
        config.fields.push(clinic_field());
        modifier(&mut config);

        let storage = SchemeRegistry::from_config(&config.storage)
            .await
            .expect("Failed to create storage schemes");

        // Each in-memory store is private to its single connection
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(":memory:", None)
                .await
                .expect("Failed to create metadata store"),
        );

        let ledger = ledger.unwrap_or_else(|| Arc::new(MetadataLedger::new(metadata.clone())));
        let state = AppState::with_components(
            config,
            storage,
            metadata,
            Arc::new(fixed_clock()),
            ledger,
        );
        let router = create_router(state.clone());

        Self {
            router,
            state,
            _temp_dir: temp_dir,
        }
    }

    /// Get access to the underlying metadata.
    pub fn metadata(&self) -> Arc<dyn MetadataStore> {
        self.state.metadata.clone()
    }

    /// Filesystem root of `scheme`.
    pub fn scheme_root(&self, scheme: &str) -> PathBuf {
        self.state.config.storage[scheme].path.clone()
    }

    /// Directory holding working files.
    pub fn cache_dir(&self) -> &Path {
        &self.state.config.uploads.cache_dir
    }
}
