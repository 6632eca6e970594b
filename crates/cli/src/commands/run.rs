//! Long-running daemon: scheduler, HTTP surface and config reload.

use crate::app::{self, ConfigArgs};
use anyhow::{Context, Result};
use autotrader_core::{AppConfig, ConfigWatcher};
use autotrader_orchestrator::{EngineActor, EngineHandle};
use autotrader_web_api::ApiServer;
use clap::Args;
use tokio::sync::{oneshot, watch};

/// Arguments for the run command.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
}

/// Runs the engine until SIGINT or SIGTERM.
///
/// # Errors
/// Returns an error if startup fails; runtime cycle failures are only logged.
pub async fn run_engine(args: RunArgs) -> Result<()> {
    let config = args.config.load()?;
    tracing::info!(
        "Starting decision cycle engine with config: {} (mode: {}, every {}m)",
        args.config.config,
        config.trading.execution_mode,
        config.trading.interval_minutes
    );

    let app = app::build(&config).await?;
    let (handle, actor_task) = EngineActor::spawn(app.engine.clone());

    // Hot reload of the trading section
    let (watcher, config_rx) =
        ConfigWatcher::new(config.clone(), &args.config.config, args.config.profile.clone());
    let watcher_task = tokio::spawn(async move {
        if let Err(e) = watcher.watch().await {
            tracing::warn!("Config watcher stopped: {e:#}");
        }
    });
    let reload_task = tokio::spawn(forward_trading_updates(config_rx, handle.clone()));

    if config.trading.autostart {
        handle.start().await?;
        tracing::info!("Scheduler autostarted");
    }

    let server = ApiServer::new(handle.clone(), app.database.clone());
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let (stop_server, server_stopped) = oneshot::channel::<()>();
    let server_task = tokio::spawn(async move {
        let shutdown = async {
            let _ = server_stopped.await;
        };
        if let Err(e) = server.serve(&addr, shutdown).await {
            tracing::error!("Server error: {e:#}");
        }
    });

    shutdown_signal().await?;

    tracing::info!("Stopping HTTP surface and waiting for any active cycle...");
    let _ = stop_server.send(());
    if let Err(e) = handle.shutdown().await {
        tracing::warn!("Engine already stopped: {e}");
    }
    match actor_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("Engine actor error: {e:#}"),
        Err(e) => tracing::error!("Engine actor panicked: {e}"),
    }
    if let Err(e) = server_task.await {
        tracing::error!("Server task panicked: {e}");
    }
    reload_task.abort();
    watcher_task.abort();

    tracing::info!("Decision cycle engine stopped");
    Ok(())
}

/// Pushes changed trading settings to the engine.
async fn forward_trading_updates(mut config_rx: watch::Receiver<AppConfig>, handle: EngineHandle) {
    let mut current = config_rx.borrow().trading.clone();
    while config_rx.changed().await.is_ok() {
        let trading = config_rx.borrow_and_update().trading.clone();
        if trading == current {
            continue;
        }
        current = trading.clone();
        if handle.update_trading(trading).await.is_err() {
            break;
        }
    }
}

async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        }
    }
    Ok(())
}
