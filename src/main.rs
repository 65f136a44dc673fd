//! band-sync - background sync of NFC wristband toolkit transactions
//!
//! This is the main entry point: `serve` runs the scheduler and control API,
//! the other subcommands talk to a running daemon over HTTP.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use reqwest::Method;
use tokio::signal;
use tracing::{error, info, warn};

use band_sync::config::Config;
use band_sync::database::SqliteDatabase;
use band_sync::otel::{init_tracing, Metrics, OtelProvider};
use band_sync::server::{AppState, Server};
use band_sync::session::SyncSession;
use band_sync::sync::{
    AssumeConnected, ConnectivityProbe, HttpSyncProvider, SyncScheduler, SyncWorker, TcpProbe,
};

/// band-sync - background sync of NFC wristband toolkit transactions
#[derive(Parser, Debug)]
#[command(name = "band-sync")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "BAND_SYNC_CONFIG", global = true)]
    config: Option<String>,

    /// Base URL of a running daemon (client commands only)
    #[arg(long, env = "BAND_SYNC_ENDPOINT", global = true)]
    endpoint: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Run the scheduler and the control API (default)
    Serve,
    /// Enable periodic auto-sync
    Enable,
    /// Disable periodic auto-sync
    Disable,
    /// Run one sync now and wait for its result
    Sync,
    /// Show auto-sync state and the last sync
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        command => run_client(command, &endpoint(&args, &config)).await,
    }
}

/// Run the daemon until a shutdown signal arrives
async fn serve(config: Config) -> anyhow::Result<()> {
    // Initialize OpenTelemetry provider
    let otel_provider = OtelProvider::new(&config.otel)?;

    // Initialize tracing/logging
    init_tracing(&otel_provider, &config.logging)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting band-sync");

    // Initialize database
    let database = SqliteDatabase::new(&config.database.path)
        .await?
        .with_run_retention(config.database.run_retention);
    let database = Arc::new(database);
    info!(
        path = %config.database.path,
        run_retention = config.database.run_retention,
        "Database initialized"
    );

    // Initialize sync provider and connectivity probe
    let provider = HttpSyncProvider::new(config.provider.clone())?;
    let probe: Arc<dyn ConnectivityProbe> =
        match config.network.probe_addr.clone().or_else(|| provider.probe_target()) {
            Some(addr) => {
                info!(addr = %addr, "Network constraint checked by TCP probe");
                Arc::new(TcpProbe::new(
                    addr,
                    Duration::from_millis(config.network.probe_timeout_ms),
                ))
            }
            None => {
                warn!("No probe target, network constraint always satisfied");
                Arc::new(AssumeConnected)
            }
        };
    info!(
        sync_url = %provider.sync_url(),
        device_id = %config.provider.device_id,
        "Sync provider initialized"
    );

    let metrics = Arc::new(Metrics::new(&otel_provider.meter()));
    let worker = SyncWorker::new(Arc::new(provider), probe)
        .with_retry_all_provider_errors(config.scheduler.retry_all_provider_errors)
        .with_attempt_timeout(config.scheduler.attempt_timeout())
        .with_metrics(metrics);

    let scheduler = SyncScheduler::new(
        config.scheduler.scheduler_config(),
        database,
        Arc::new(worker),
    );
    let session = Arc::new(
        SyncSession::start(
            scheduler,
            config.scheduler.task(),
            config.scheduler.auto_sync,
        )
        .await?,
    );
    info!(
        task = %session.task().name,
        auto_sync = config.scheduler.auto_sync,
        "Sync session started"
    );

    // Create and start the HTTP server
    let state = AppState {
        session: Arc::clone(&session),
    };
    let server = Server::new(config.server.clone(), state);

    info!(
        host = %config.server.host,
        port = %config.server.port,
        "Starting HTTP server"
    );

    let result = server.run(shutdown_signal()).await;

    // Loops stop here; the persisted schedule survives for the next start
    session.detach().await;

    // Shutdown OpenTelemetry
    if let Err(e) = otel_provider.shutdown() {
        error!(error = %e, "Failed to shutdown OpenTelemetry");
    }

    info!("band-sync shutdown complete");

    result.map_err(Into::into)
}

/// Call the daemon's control API and print the JSON response
async fn run_client(command: Command, endpoint: &str) -> anyhow::Result<()> {
    let (method, path) = match command {
        Command::Enable => (Method::POST, "/api/sync/auto"),
        Command::Disable => (Method::DELETE, "/api/sync/auto"),
        Command::Sync => (Method::POST, "/api/sync/trigger"),
        Command::Status | Command::Serve => (Method::GET, "/api/sync/status"),
    };
    let url = format!("{}{}", endpoint.trim_end_matches('/'), path);

    let response = reqwest::Client::new()
        .request(method, &url)
        .send()
        .await
        .with_context(|| format!("Failed to reach band-sync at {}", endpoint))?;

    let status = response.status();
    let body: serde_json::Value = response
        .json()
        .await
        .with_context(|| format!("Invalid response from {}", url))?;

    println!("{}", serde_json::to_string_pretty(&body)?);

    if !status.is_success() {
        anyhow::bail!("Request failed with HTTP {}", status.as_u16());
    }
    Ok(())
}

/// Client endpoint: `--endpoint`, else the configured server address
fn endpoint(args: &Args, config: &Config) -> String {
    args.endpoint.clone().unwrap_or_else(|| {
        format!("http://{}:{}", config.server.host, config.server.port)
    })
}

/// Load configuration from file or environment
fn load_config(args: &Args) -> anyhow::Result<Config> {
    match &args.config {
        Some(path) => {
            // Use eprintln! since tracing is not yet initialized
            eprintln!("Loading configuration from file: {}", path);
            Config::from_file(path).map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
        }
        None => {
            // Use eprintln! since tracing is not yet initialized
            eprintln!("Loading configuration from environment variables");
            Config::from_env().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
        }
    }
}

/// Create a future that resolves when a shutdown signal is received
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
