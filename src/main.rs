//! gort-dock - docking control service for the gort ground vehicle
//!
//! Listens for the proximity beacon's TCP session, runs the docking state
//! machine, and keeps the drive bus fed with one motion command per tick.
//!
//! Module structure:
//! - `domain/` - Line classification and the docking state machine
//! - `io/` - External interfaces (beacon server, drive bus, trip log)
//! - `services/` - Docking actor and command generator
//! - `infra/` - Infrastructure (config, metrics, backoff)

use clap::Parser;
use gort_dock::infra::{Config, Metrics};
use gort_dock::io::drive_bus::{DriveBusClient, DriveBusConfig};
use gort_dock::io::{run_beacon_server, TripLog};
use gort_dock::services::{Commander, DockingActor};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// gort-dock - beacon docking control service
#[derive(Parser, Debug)]
#[command(name = "gort-dock", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to GORT_CONFIG,
    /// then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Structured logging, level via RUST_LOG (default: info)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!("gort-dock starting");

    let args = Args::parse();
    let config_path = Config::resolve_config_path(args.config.as_deref());
    let config = Config::load_from_path(&config_path);

    info!(
        config_file = %config.config_file(),
        listen_addr = %config.listen_addr(),
        drive_addr = %config.drive_addr(),
        tick_ms = %config.tick_ms(),
        min_speed = %config.min_speed(),
        max_speed = %config.max_speed(),
        trip_log_dir = %config.trip_log_dir(),
        "config_loaded"
    );

    // Shutdown signal and the one-shot start gate dependent tasks await.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (ready_tx, ready_rx) = watch::channel(false);

    let metrics = Arc::new(Metrics::new());

    // Measured ground speed, fed by the drive bus, read by the actor.
    let (speed_tx, speed_rx) = watch::channel(0.0f64);

    // Docking actor - single writer over the shared state
    let trip_log = TripLog::new(config.trip_log_dir());
    let (req_tx, req_rx) = mpsc::channel(64);
    let (actor, snapshot_rx) =
        DockingActor::new(config.docking_params(), trip_log, speed_rx, metrics.clone());
    tokio::spawn(actor.run(req_rx, shutdown_rx.clone()));

    // Drive bus client
    let (cmd_tx, cmd_rx) = mpsc::channel(config.command_queue());
    let bus_config = DriveBusConfig {
        addr: config.drive_addr().to_string(),
        connect_timeout: config.connect_timeout(),
        read_timeout: config.read_timeout(),
    };
    let bus = DriveBusClient::new(
        bus_config,
        cmd_rx,
        speed_tx,
        config.drive_backoff(),
        metrics.clone(),
    );
    tokio::spawn(bus.run(ready_rx.clone(), shutdown_rx.clone()));

    // Command generator
    let commander = Commander::new(
        snapshot_rx,
        cmd_tx,
        config.tick(),
        config.max_speed(),
        metrics.clone(),
    );
    tokio::spawn(commander.run(ready_rx.clone(), shutdown_rx.clone()));

    // Periodic metrics summary
    tokio::spawn(gort_dock::infra::metrics::run_reporter(
        metrics.clone(),
        std::time::Duration::from_secs(config.metrics_interval_secs()),
        shutdown_rx.clone(),
    ));

    // Handle shutdown on Ctrl+C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    // Bind before opening the gate so dependent loops start against a
    // live listener.
    let listener = TcpListener::bind(config.listen_addr()).await?;
    info!(addr = %config.listen_addr(), "beacon_server_started");
    let _ = ready_tx.send(true);

    run_beacon_server(listener, req_tx, metrics, shutdown_rx).await;

    info!("gort-dock shutdown complete");
    Ok(())
}
