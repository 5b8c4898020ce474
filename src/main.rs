//! Hashwatch daemon
//!
//! Loads configuration, runs the hasher self-test, opens the published
//! index, starts the background refresh loop and serves the HTTP API.
//!
//! Run with: cargo run --bin hashwatch -- --config config.toml
//!
//! `RUST_LOG` overrides the configured log level.

use clap::Parser;
use hashwatch::api::{serve, ApiConfig, AppState};
use hashwatch::config::{Config, LoggingConfig};
use hashwatch::hasher::Availability;
use hashwatch::index::{GenerationStore, QueryEngine};
use hashwatch::refresh::{HttpDumpSource, RefreshManager};
use hashwatch::service::MatchService;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "hashwatch")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Perceptual-hash matching daemon")]
struct Args {
    /// Config file (default: standard locations, then environment)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };

    init_logging(&config.logging);
    tracing::info!("Starting Hashwatch v{}", env!("CARGO_PKG_VERSION"));

    let data_dir = config.data_dir();
    tracing::info!("Data directory: {:?}", data_dir);
    let store = Arc::new(GenerationStore::open(&data_dir)?);

    let availability = Availability::probe(&config.hasher).await;
    match &availability {
        Availability::Enabled(hasher) => {
            tracing::info!(binary = ?hasher.binary(), "Image matching enabled")
        }
        Availability::Disabled(reason) => {
            tracing::warn!(reason = %reason, "Image matching disabled")
        }
    }

    let engine = QueryEngine::new(Arc::clone(&store), config.index.effective_max_distance());
    let service = Arc::new(MatchService::new(
        availability,
        engine,
        config.index.query_workers,
    ));

    let api_config = ApiConfig::from(&config.api);
    let mut refresh_task = None;

    let state = if config.refresh.enabled && service.is_enabled() {
        let source = HttpDumpSource::new(
            config.refresh.manifest_url.clone(),
            Duration::from_secs(config.refresh.connect_timeout_secs),
            Duration::from_secs(config.refresh.read_timeout_secs),
        )?;
        tracing::info!(manifest = %source.manifest_url(), "Index refresh enabled");

        let manager = Arc::new(RefreshManager::new(
            Arc::new(source),
            Arc::clone(&store),
            config.refresh_options(),
        ));
        refresh_task = Some(Arc::clone(&manager).start());

        AppState::with_refresh(service, manager, api_config.clone())
    } else {
        tracing::info!("Index refresh not started");
        AppState::new(service, api_config.clone())
    };

    let result = serve(state, &api_config).await;

    if let Some(task) = refresh_task {
        task.abort();
    }

    tracing::info!("Hashwatch shutdown complete");
    result.map_err(Into::into)
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("hashwatch={},tower_http=info", config.level))
    });

    let registry = tracing_subscriber::registry().with(filter);
    if config.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
