//! pingmon Binary Entry Point
//!
//! Runs the measurement engine and the web server until SIGINT/SIGTERM.
//! Core functionality is provided by the `pingmon` library crate.

use std::collections::BTreeSet;
use std::sync::Arc;

use clap::Parser;
use pingmon::{
    broadcast::{LiveBroadcaster, ShutdownBroadcaster},
    config::AppConfig,
    icmp::{Family, IcmpTransport, process_identifier},
    monitor::Monitor,
    series::TimeSeriesService,
    server::{AppState, create_router, serve},
    storage::StorageBuilder,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// pingmon - ICMP reachability monitor
#[derive(Parser, Debug)]
#[command(name = "pingmon", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        default_value = "configs/config.yaml",
        env = "PINGMON_CONFIG"
    )]
    config: String,

    /// Server bind address (overrides config file)
    #[arg(long, env = "PINGMON_SERVER_BIND")]
    server_bind: Option<String>,

    /// Server port (overrides config file)
    #[arg(long, env = "PINGMON_SERVER_PORT")]
    server_port: Option<u16>,

    /// Database URL (overrides config file)
    #[arg(long, env = "PINGMON_DB_URL")]
    db_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,pingmon=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("pingmon - ICMP reachability monitor");

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration from file
    tracing::info!("Loading configuration from: {}", cli.config);
    let mut config = AppConfig::load(&cli.config)?;

    // Apply CLI/env overrides (CLI > ENV > config file)
    if let Some(bind) = cli.server_bind {
        config.server.bind = bind;
    }
    if let Some(port) = cli.server_port {
        config.server.port = port;
    }
    if let Some(dsn) = cli.db_url {
        config.database.dsn = pingmon::config::expand_env_vars(&dsn);
    }
    config.validate()?;

    let peers = config.peers()?;
    let addr = config.listen_addr()?;
    tracing::info!(
        "Server: {}, Database: {}, Peers: {}",
        addr,
        config.database.dsn,
        peers.len()
    );

    // Build storage layer
    let handles = StorageBuilder::new(&config.database.dsn).build().await?;
    tracing::info!("Storage initialized");

    // Open raw sockets for the families in use
    let families: Vec<Family> = peers
        .iter()
        .map(|p| Family::of(&p.address))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let (transport, receivers) = IcmpTransport::open(&families, process_identifier())?;

    let shutdown = Arc::new(ShutdownBroadcaster::new());
    let live = LiveBroadcaster::new(config.monitor.live_buffer);
    if live.capacity() != config.monitor.live_buffer {
        tracing::info!(
            configured = config.monitor.live_buffer,
            effective = live.capacity(),
            "Live buffer rounded up to a power of two"
        );
    }

    // Start measurement engine
    let tasks = Monitor::new(
        peers.clone(),
        handles.samples.clone(),
        live.clone(),
        shutdown.clone(),
    )
    .with_settings(config.monitor.correlator_settings())
    .with_event_buffer(config.monitor.event_buffer)
    .start(Arc::new(transport), receivers)?;
    tracing::info!(tasks = tasks.len(), "Monitor started");

    // Create web server state
    let app_state = AppState {
        series: Arc::new(TimeSeriesService::new(
            handles.samples.clone(),
            &peers,
            config.monitor.interval,
        )),
        store: handles.samples.clone(),
        peers: Arc::new(peers),
        live,
        shutdown: shutdown.clone(),
        static_dir: config.server.static_dir.clone(),
    };

    // Build Axum router
    let app = create_router(app_state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let server_token = shutdown.subscribe()?;
    let server = tokio::spawn(serve(listener, app, server_token));

    tracing::info!("Press Ctrl+C to shutdown");
    shutdown_signal().await;

    tracing::info!("Shutting down...");
    shutdown.signal();
    shutdown.wait_for_acknowledgement().await;
    tasks.join().await;

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "Web server failed"),
        Err(e) => tracing::error!(error = %e, "Web server task failed"),
    }

    tracing::info!("Shutting down storage...");
    if let Err(e) = handles.shutdown().await {
        tracing::error!("Failed to shutdown storage: {}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }
}
