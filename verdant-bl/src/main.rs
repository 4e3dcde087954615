//! verdant-bl - Batch Lifecycle service
//!
//! Loads the TOML bootstrap config, opens the SQLite database, starts the
//! regulatory sync worker and the recipe day cadence, and serves the HTTP API.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use verdant_common::config::{load_toml_config, TomlConfig};
use verdant_common::events::EventBus;

use verdant_bl::cadence::DayCadence;
use verdant_bl::collaborators::{InMemoryTelemetryFeed, SqliteInventory};
use verdant_bl::sync::{HttpRegulatoryClient, SyncCoordinator};
use verdant_bl::{AppState, Jurisdiction, LifecycleService};

/// Command-line arguments for verdant-bl
#[derive(Parser, Debug)]
#[command(name = "verdant-bl")]
#[command(about = "Cultivation batch lifecycle service")]
#[command(version)]
struct Args {
    /// TOML bootstrap config; defaults apply when absent
    #[arg(short, long, env = "VERDANT_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long, env = "VERDANT_BL_PORT")]
    port: Option<u16>,

    /// SQLite database file (overrides config)
    #[arg(short, long, env = "VERDANT_DATABASE")]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_toml_config(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => TomlConfig::default(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(database) = args.database {
        config.database_path = database;
    }

    let default_filter = format!(
        "verdant_bl={level},verdant_common={level},tower_http={level}",
        level = config.logging.level
    );
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_hash = env!("GIT_HASH"),
        build_timestamp = env!("BUILD_TIMESTAMP"),
        profile = env!("BUILD_PROFILE"),
        "Starting verdant-bl (Batch Lifecycle)"
    );

    let jurisdiction = Jurisdiction::from_config(&config.jurisdiction)
        .context("Invalid [jurisdiction] configuration")?;
    info!(
        jurisdiction = %jurisdiction.code,
        requires_external_sync = jurisdiction.requires_external_sync,
        requires_plant_tags = jurisdiction.requires_plant_tags,
        "Jurisdiction loaded"
    );

    let pool = verdant_common::db::init_database(&config.database_path)
        .await
        .with_context(|| format!("Failed to open database {}", config.database_path.display()))?;
    info!("Database: {}", config.database_path.display());

    let event_bus = EventBus::new(256);
    let telemetry = Arc::new(InMemoryTelemetryFeed::new());
    let inventory = Arc::new(SqliteInventory::new(pool.clone()));
    let service = LifecycleService::new(
        pool.clone(),
        jurisdiction,
        event_bus.clone(),
        inventory.clone(),
        telemetry.clone(),
    );

    let cancel = CancellationToken::new();
    let mut workers = Vec::new();

    match &config.regulator {
        Some(regulator) => {
            let client = HttpRegulatoryClient::new(
                regulator,
                Duration::from_millis(config.sync.request_timeout_ms),
            )
            .context("Failed to build regulator client")?;
            let coordinator = SyncCoordinator::new(
                pool.clone(),
                Arc::new(client),
                config.sync.clone(),
                service.sync_notify(),
                event_bus.clone(),
            );
            info!(base_url = %regulator.base_url, "Regulatory sync enabled");
            workers.push(tokio::spawn(coordinator.run(cancel.clone())));
        }
        None => warn!("No [regulator] configured; phase-change jobs stay pending"),
    }

    if config.cadence.enabled {
        let cadence = DayCadence::new(
            service.clone(),
            Duration::from_secs(config.cadence.interval_secs.max(1)),
        );
        workers.push(tokio::spawn(cadence.run(cancel.clone())));
    }

    let app = verdant_bl::build_router(AppState::new(service, telemetry, inventory));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    cancel.cancel();
    for worker in workers {
        let _ = worker.await;
    }
    pool.close().await;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
