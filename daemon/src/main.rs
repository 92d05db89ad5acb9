//! stack-supervisord
//!
//! Loads the service file named by `SV_CONFIG_FILE`, starts every service in
//! dependency order, polls the configured health checks and runs until
//! SIGTERM or SIGINT, then stops everything in reverse registration order.

mod config;

use anyhow::{Context, Result, anyhow};
use config::DaemonConfig;
use std::io::IsTerminal;
use std::sync::Arc;
use supervisor_engine::{ProcessManager, SupervisorContext};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = DaemonConfig::from_env();
    init_logging(&config.log_level);
    config.validate().map_err(|e| anyhow!(e))?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        status_file = %config.status_file.display(),
        "Starting stack-supervisord"
    );

    let context = SupervisorContext::system();
    let manager = Arc::new(
        ProcessManager::new(context.clone())
            .with_status_file(&config.status_file)
            .with_tick(config.tick),
    );
    let monitor = context.health_monitor();

    let checks = match &config.config_file {
        Some(path) => {
            if !path.exists() {
                error!(path = %path.display(), "Config file does not exist");
                return Err(anyhow!("config file {} does not exist", path.display()));
            }
            manager
                .load_config(path)
                .with_context(|| format!("failed to load {}", path.display()))?
        }
        None => {
            warn!("SV_CONFIG_FILE not set, no services configured");
            Vec::new()
        }
    };
    info!(
        services = manager.len(),
        health_checks = checks.len(),
        "Loaded {} service(s)",
        manager.len()
    );

    for check in checks {
        let name = check.name.clone();
        monitor
            .register_service(check)
            .with_context(|| format!("invalid health check '{name}'"))?;
    }
    monitor.set_restart_handler(manager.clone());

    if let Err(e) = manager.start_all().await {
        warn!(error = %e, "Not every service started");
    }
    monitor.start();

    let runner = tokio::spawn({
        let manager = Arc::clone(&manager);
        async move { manager.run().await }
    });

    shutdown_signal().await?;
    info!("Shutdown signal received");

    monitor.stop().await;
    manager.shutdown().await;
    if let Err(e) = runner.await {
        warn!(error = %e, "Manager run loop ended abnormally");
    }
    if let Err(e) = manager.persist_status().await {
        warn!(error = %e, "Failed to write final status snapshot");
    }

    info!("stack-supervisord stopped");
    Ok(())
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(std::io::stdout().is_terminal())
        .init();
}

#[cfg(unix)]
async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")
}
