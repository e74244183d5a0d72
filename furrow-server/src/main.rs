use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use furrow_server::api::{self, ApiState};
use furrow_server::broadcast::{self, BroadcastRegistry};
use furrow_server::config::{Config, StorageConfig};
use furrow_server::engine::IrrigationEngine;
use furrow_server::mqtt;
use furrow_server::storage::{
    InMemoryStore, IrrigationStore, ReadingStore, SqliteStore, ZoneMoistureProbe,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "furrow-server")]
#[command(about = "Furrow farm monitoring and irrigation control backend")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "furrow.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = if cli.config.exists() {
        info!(path = ?cli.config, "Loading configuration");
        Config::load(&cli.config)?
    } else {
        info!("No configuration file found, using defaults");
        Config::default()
    };

    match config.storage.clone() {
        StorageConfig::Memory => {
            info!("Using in-memory storage");
            run_server(InMemoryStore::new(), config).await?;
        }
        StorageConfig::Sqlite { path } => {
            info!(path = ?path, "Using SQLite storage");
            let store = SqliteStore::new(&path).await?;
            run_server(store, config).await?;
        }
    }

    Ok(())
}

async fn run_server<St>(store: St, config: Config) -> color_eyre::Result<()>
where
    St: IrrigationStore + ReadingStore,
{
    let cancel = CancellationToken::new();

    let registry = Arc::new(BroadcastRegistry::new(
        config.broadcast.max_connections,
        Duration::from_millis(config.broadcast.rate_limit_ms),
    ));

    let (mqtt, eventloop) = mqtt::connect(&config.mqtt);
    let engine = IrrigationEngine::new(
        store.clone(),
        mqtt.clone(),
        ZoneMoistureProbe::new(store.clone()),
    );

    tokio::spawn(mqtt::run_ingest(
        mqtt.clone(),
        eventloop,
        config.mqtt.sensor_topic.clone(),
        store.clone(),
        Arc::clone(&registry),
        cancel.clone(),
    ));
    tokio::spawn(broadcast::run_heartbeat(
        Arc::clone(&registry),
        Duration::from_secs(config.broadcast.heartbeat_secs),
        cancel.clone(),
    ));

    let state = ApiState {
        engine,
        readings: store,
        registry,
        mqtt,
    };
    let app = api::api_router(state);

    let listener = TcpListener::bind(config.server.http_addr).await?;
    info!(http_addr = %config.server.http_addr, "HTTP server listening");

    let cancel_clone = cancel.clone();
    tokio::select! {
        result = axum::serve(listener, app).with_graceful_shutdown(async move {
            cancel_clone.cancelled().await;
        }) => {
            if let Err(e) = result {
                tracing::error!(error = ?e, "HTTP server error");
            }
            info!("HTTP server shut down");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
            cancel.cancel();
        }
    }

    Ok(())
}
