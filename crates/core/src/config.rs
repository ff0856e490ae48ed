//! Configuration types shared across crates.

use crate::policy::{FieldKey, FieldPolicy, StaticFieldPolicies};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Largest `Upload-Length` accepted at session creation.
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,
    /// Largest PATCH body accepted in one request.
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: u64,
    /// Idle lifetime of an upload session in seconds.
    #[serde(default = "default_session_expiry_secs")]
    pub session_expiry_secs: u64,
    /// Interval between expiry sweeps in seconds.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
    /// Module name recorded on provisional usage references.
    #[serde(default = "default_usage_module")]
    pub usage_module: String,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_max_upload_size() -> u64 {
    4 * 1024 * 1024 * 1024 // 4 GiB
}

fn default_max_chunk_size() -> u64 {
    64 * 1024 * 1024
}

fn default_session_expiry_secs() -> u64 {
    86400 // 24 hours
}

fn default_sweep_interval_secs() -> u64 {
    3600
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_usage_module() -> String {
    "berth".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_upload_size: default_max_upload_size(),
            max_chunk_size: default_max_chunk_size(),
            session_expiry_secs: default_session_expiry_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            metrics_enabled: default_metrics_enabled(),
            usage_module: default_usage_module(),
        }
    }
}

impl ServerConfig {
    /// Get the session expiry as a Duration.
    pub fn session_expiry(&self) -> Duration {
        // Saturate at i64::MAX to prevent overflow wrapping to negative
        let secs = i64::try_from(self.session_expiry_secs).unwrap_or(i64::MAX);
        Duration::seconds(secs)
    }

    /// Get the sweep interval as a std::time::Duration.
    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_upload_size == 0 {
            return Err("server.max_upload_size must be greater than 0".to_string());
        }
        if self.max_chunk_size == 0 {
            return Err("server.max_chunk_size must be greater than 0".to_string());
        }
        if self.max_chunk_size > usize::MAX as u64 {
            return Err(format!(
                "server.max_chunk_size {} does not fit in memory on this platform",
                self.max_chunk_size
            ));
        }
        // tokio::time::interval panics on a zero period
        if self.sweep_interval_secs == 0 {
            return Err("server.sweep_interval_secs cannot be 0".to_string());
        }
        if self.usage_module.trim().is_empty() {
            return Err("server.usage_module cannot be empty".to_string());
        }
        Ok(())
    }
}

/// Working area for in-flight uploads.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadsConfig {
    /// Directory holding `.{upload_key}.part` working files.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./data/tus")
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
        }
    }
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database.
    Sqlite {
        /// Database file path, or `:memory:`.
        path: PathBuf,
        /// How long a statement waits on a locked database, in seconds.
        #[serde(default = "default_sqlite_query_timeout_secs")]
        query_timeout_secs: Option<u64>,
    },
}

fn default_sqlite_query_timeout_secs() -> Option<u64> {
    Some(5)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/metadata.db"),
            query_timeout_secs: default_sqlite_query_timeout_secs(),
        }
    }
}

/// Filesystem root backing one URI scheme.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchemeConfig {
    /// Root directory for the scheme.
    pub path: PathBuf,
    /// Public base URL; objects without one are addressed by their URI.
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Placement rules for one field, as written in configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldConfig {
    pub entity_type: String,
    pub bundle: String,
    pub field_name: String,
    /// Whitespace-separated extensions, e.g. `"txt pdf doc"`.
    pub file_extensions: String,
    #[serde(default = "default_uri_scheme")]
    pub uri_scheme: String,
    #[serde(default)]
    pub file_directory: String,
    #[serde(default)]
    pub max_filesize: Option<u64>,
}

fn default_uri_scheme() -> String {
    "public".to_string()
}

impl FieldConfig {
    pub fn key(&self) -> FieldKey {
        FieldKey::new(&self.entity_type, &self.bundle, &self.field_name)
    }

    pub fn policy(&self) -> FieldPolicy {
        FieldPolicy {
            allowed_extensions: FieldPolicy::parse_extensions(&self.file_extensions),
            uri_scheme: self.uri_scheme.clone(),
            file_directory: self.file_directory.clone(),
            max_size: self.max_filesize,
        }
    }
}

fn default_storage() -> BTreeMap<String, SchemeConfig> {
    BTreeMap::from([
        (
            "public".to_string(),
            SchemeConfig {
                path: PathBuf::from("./data/public"),
                base_url: None,
            },
        ),
        (
            "private".to_string(),
            SchemeConfig {
                path: PathBuf::from("./data/private"),
                base_url: None,
            },
        ),
    ])
}

/// Complete application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub uploads: UploadsConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// Storage roots keyed by URI scheme.
    #[serde(default = "default_storage")]
    pub storage: BTreeMap<String, SchemeConfig>,
    /// Field placement policies.
    #[serde(default)]
    pub fields: Vec<FieldConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            uploads: UploadsConfig::default(),
            metadata: MetadataConfig::default(),
            storage: default_storage(),
            fields: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Create a test configuration rooted at `root`.
    ///
    /// **For testing only.** Uses in-memory SQLite and one `public` scheme.
    pub fn for_testing(root: &Path) -> Self {
        Self {
            server: ServerConfig::default(),
            uploads: UploadsConfig {
                cache_dir: root.join("tus"),
            },
            metadata: MetadataConfig::Sqlite {
                path: PathBuf::from(":memory:"),
                query_timeout_secs: None,
            },
            storage: BTreeMap::from([(
                "public".to_string(),
                SchemeConfig {
                    path: root.join("public"),
                    base_url: None,
                },
            )]),
            fields: Vec::new(),
        }
    }

    /// Validate the whole configuration.
    pub fn validate(&self) -> Result<(), String> {
        self.server.validate()?;

        if self.storage.is_empty() {
            return Err("at least one storage scheme must be configured".to_string());
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            let key = field.key();
            if !seen.insert(key.clone()) {
                return Err(format!("field {key} is configured more than once"));
            }
            if !self.storage.contains_key(&field.uri_scheme) {
                return Err(format!(
                    "field {key} uses scheme {:?} which has no storage configured",
                    field.uri_scheme
                ));
            }
            if field.policy().allowed_extensions.is_empty() {
                return Err(format!("field {key} allows no file extensions"));
            }
        }

        Ok(())
    }

    /// Build the policy source for all configured fields.
    pub fn field_policies(&self) -> StaticFieldPolicies {
        self.fields.iter().map(|f| (f.key(), f.policy())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::FieldPolicySource;

    const SAMPLE: &str = r#"
        [server]
        bind = "0.0.0.0:9000"
        usage_module = "tus"

        [uploads]
        cache_dir = "/var/lib/berth/tus"

        [metadata]
        type = "sqlite"
        path = "/var/lib/berth/metadata.db"

        [storage.public]
        path = "/srv/files"
        base_url = "https://files.example.com"

        [[fields]]
        entity_type = "healthcare"
        bundle = "clinic"
        field_name = "file"
        file_extensions = "txt pdf"
        file_directory = "[date:custom:Y]-[date:custom:m]"
        max_filesize = 1048576
    "#;

    #[test]
    fn test_server_config_defaults() {
        let config = ServerConfig::default();
        assert!(config.metrics_enabled);
        assert_eq!(config.usage_module, "berth");
        assert_eq!(config.session_expiry(), Duration::days(1));
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_sample_config() {
        let config: AppConfig = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert_eq!(config.server.max_chunk_size, default_max_chunk_size());
        assert_eq!(config.storage.len(), 1);
        assert_eq!(
            config.storage["public"].base_url.as_deref(),
            Some("https://files.example.com")
        );
        assert_eq!(config.fields[0].uri_scheme, "public");
        config.validate().unwrap();

        let policies = config.field_policies();
        let policy = policies
            .field_policy(&FieldKey::new("healthcare", "clinic", "file"))
            .unwrap();
        assert_eq!(policy.allowed_extensions, vec!["txt", "pdf"]);
        assert_eq!(policy.max_size, Some(1048576));
    }

    #[test]
    fn test_validate_rejects_unknown_scheme() {
        let mut config: AppConfig = toml::from_str(SAMPLE).unwrap();
        config.fields[0].uri_scheme = "private".to_string();
        assert!(config.validate().unwrap_err().contains("private"));
    }

    #[test]
    fn test_validate_rejects_duplicate_fields() {
        let mut config: AppConfig = toml::from_str(SAMPLE).unwrap();
        config.fields.push(config.fields[0].clone());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_sweep_interval() {
        let mut config = AppConfig::default();
        config.server.sweep_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_for_testing_is_valid() {
        let config = AppConfig::for_testing(Path::new("/tmp/berth-test"));
        config.validate().unwrap();
        assert_eq!(config.uploads.cache_dir, Path::new("/tmp/berth-test/tus"));
    }
}
