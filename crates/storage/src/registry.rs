//! URI scheme registry.

use crate::backends::filesystem::FilesystemBackend;
use crate::error::{StorageError, StorageResult};
use crate::traits::ObjectStore;
use berth_core::ObjectUri;
use berth_core::config::SchemeConfig;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One configured scheme: its store and optional public base URL.
#[derive(Clone)]
pub struct SchemeStore {
    pub store: Arc<dyn ObjectStore>,
    pub base_url: Option<String>,
}

/// Maps URI schemes such as `public` or `private` to object stores.
#[derive(Clone, Default)]
pub struct SchemeRegistry {
    schemes: BTreeMap<String, SchemeStore>,
}

impl SchemeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build filesystem-backed schemes from configuration.
    pub async fn from_config(config: &BTreeMap<String, SchemeConfig>) -> StorageResult<Self> {
        if config.is_empty() {
            return Err(StorageError::Config(
                "no storage schemes configured".to_string(),
            ));
        }

        let mut registry = Self::new();
        for (scheme, scheme_config) in config {
            let backend = FilesystemBackend::new(&scheme_config.path).await?;
            tracing::debug!(scheme = %scheme, root = ?scheme_config.path, "Storage scheme registered");
            registry.insert(scheme, Arc::new(backend), scheme_config.base_url.clone());
        }
        Ok(registry)
    }

    pub fn insert(
        &mut self,
        scheme: impl Into<String>,
        store: Arc<dyn ObjectStore>,
        base_url: Option<String>,
    ) {
        let base_url = base_url.map(|u| u.trim_end_matches('/').to_string());
        self.schemes
            .insert(scheme.into(), SchemeStore { store, base_url });
    }

    /// Store for `scheme`.
    pub fn store(&self, scheme: &str) -> StorageResult<Arc<dyn ObjectStore>> {
        self.schemes
            .get(scheme)
            .map(|s| s.store.clone())
            .ok_or_else(|| StorageError::UnknownScheme(scheme.to_string()))
    }

    /// Public-facing URL of an object: `base_url/path` when the scheme has a
    /// base URL, otherwise the URI itself.
    pub fn public_url(&self, uri: &ObjectUri) -> String {
        match self
            .schemes
            .get(&uri.scheme)
            .and_then(|s| s.base_url.as_deref())
        {
            Some(base) => format!("{base}/{}", uri.path),
            None => uri.to_string(),
        }
    }

    pub fn schemes(&self) -> impl Iterator<Item = &str> {
        self.schemes.keys().map(String::as_str)
    }

    /// Health-check every scheme's backend.
    pub async fn health_check(&self) -> StorageResult<()> {
        for (scheme, entry) in &self.schemes {
            entry.store.health_check().await.map_err(|e| {
                tracing::error!(scheme = %scheme, error = %e, "Storage health check failed");
                e
            })?;
        }
        Ok(())
    }
}
