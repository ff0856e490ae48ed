//! berth server binary.

use anyhow::{Context, Result};
use berth_core::config::AppConfig;
use berth_server::sweep::spawn_expiry_sweep;
use berth_server::{AppState, create_router};
use berth_storage::SchemeRegistry;
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// berth - resumable upload server
#[derive(Parser, Debug)]
#[command(name = "berthd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "BERTH_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("berth v{}", env!("CARGO_PKG_VERSION"));

    // The file is optional; BERTH_ variables can provide or override everything.
    let config_path = std::path::Path::new(&args.config);
    let mut figment = Figment::new();
    let has_config_file = config_path.exists();

    if has_config_file {
        tracing::info!(config_path = %args.config, "Loading configuration from file");
        figment = figment.merge(Toml::file(&args.config));
    } else {
        tracing::debug!("No config file found at {}", args.config);
    }

    let has_env_config =
        std::env::vars().any(|(key, _)| key.starts_with("BERTH_") && key != "BERTH_CONFIG");

    if !has_config_file && !has_env_config {
        anyhow::bail!(
            "No configuration provided.\n\n\
             Provide configuration via one of:\n  \
             1. Config file: berthd --config /path/to/config.toml\n  \
             2. Environment variables: BERTH_SERVER__BIND=0.0.0.0:8080 berthd\n\n\
             See config/server.toml for an example configuration.\n\
             Set BERTH_CONFIG env var to specify a default config file path."
        );
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("BERTH_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!(e))
        .context("invalid configuration")?;
    tracing::info!(fields = config.fields.len(), "Configuration loaded");

    berth_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let storage = SchemeRegistry::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    storage
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!(
        schemes = ?storage.schemes().collect::<Vec<_>>(),
        "Storage schemes initialized"
    );

    tokio::fs::create_dir_all(&config.uploads.cache_dir)
        .await
        .with_context(|| {
            format!(
                "failed to create upload cache dir {}",
                config.uploads.cache_dir.display()
            )
        })?;

    let metadata = berth_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    tracing::info!("Metadata store initialized");

    let state = AppState::new(config.clone(), storage, metadata);

    spawn_expiry_sweep(state.engine.clone(), config.server.sweep_interval());
    tracing::info!(
        interval_secs = config.server.sweep_interval_secs,
        "Session expiry sweep spawned"
    );

    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}
