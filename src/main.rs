use std::process;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use swarmwatch::cli::{format_dry_run, Args};
use swarmwatch::config::{load_env_file, MonitorConfig};
use swarmwatch::monitor::Monitor;

#[tokio::main]
async fn main() {
    let mut args = Args::parse();

    // Initialize logging
    let filter = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    // Load .env file if specified, then parse again so its values reach the env fallbacks
    if let Some(env_file) = args.env_file.clone() {
        if let Err(e) = load_env_file(&env_file) {
            error!("{}", e);
            process::exit(1);
        }
        args = Args::parse();
    }

    let config = match MonitorConfig::from_args(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            process::exit(1);
        }
    };

    // Dry-run mode: print resolved configuration and exit
    if args.dry_run {
        println!("{}", format_dry_run(&config));
        return;
    }

    if let Err(e) = run(config).await {
        error!("{:#}", e);
        process::exit(1);
    }
}

async fn run(config: MonitorConfig) -> anyhow::Result<()> {
    info!(
        manager = %config.manager_url,
        agents = %format!("{}:{}", config.agent_dns, config.agent_port),
        stats_interval = config.stats_interval.as_secs(),
        retention_ms = config.retention_ttl.as_millis() as u64,
        "Starting swarmwatch"
    );

    let monitor = Monitor::start(&config)
        .await
        .context("Failed to create upstream client")?;

    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Server listening on {}", addr);
    info!("Endpoints:");
    info!("  GET  /healthz     - Liveness probe");
    info!("  GET  /api/state   - Aggregated cluster state");
    info!("  GET  /api/events  - Cluster events (SSE)");

    axum::serve(listener, monitor.router())
        .with_graceful_shutdown(shutdown_signal(monitor.shutdown_handle()))
        .await
        .context("Server error")?;

    monitor.shutdown().await;
    Ok(())
}

async fn shutdown_signal(shutdown: watch::Sender<bool>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
    // Ends open event streams so graceful shutdown can complete
    let _ = shutdown.send(true);
}
