use std::time::Duration;

use anyhow::Result;
use manager::AppState;
use shared::{Config, LogFormat};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const MONITOR_RESUBSCRIBE_DELAY: Duration = Duration::from_secs(5);

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT (Ctrl+C), shutting down"),
                }
                return;
            }
            Err(e) => warn!("Cannot install SIGTERM handler: {}", e),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Cannot listen for Ctrl+C: {}", e);
    }
    info!("Shutting down");
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = Config::from_env()?;
    init_tracing(config.log_format);

    info!(
        "Starting bot lifecycle manager ({} @ {}, built {})",
        option_env!("GIT_BRANCH").unwrap_or("unknown"),
        option_env!("GIT_HASH").unwrap_or("unknown"),
        option_env!("BUILD_TIME").unwrap_or("unknown"),
    );
    info!(
        "Instance data in {}, strategies from {}",
        config.workspace.user_data_dir.display(),
        config.workspace.strategy_source_dir.display()
    );

    let state = AppState::new(config).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    {
        let monitor = state.monitor.clone();
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            loop {
                // Errors are logged by the monitor itself.
                let _ = monitor.run().await;
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(MONITOR_RESUBSCRIBE_DELAY) => {}
                }
            }
        });
    }

    if let Err(e) = state.supervisor.reconcile_all().await {
        error!("Startup reconciliation failed: {}", e);
    }

    let mut scheduler = state.expiry.clone().start().await?;

    let command_queue = {
        let queue = state.command_queue.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = queue.run(shutdown).await {
                error!("Command queue failed: {}", e);
            }
        })
    };

    info!("✅ Lifecycle manager is running");
    shutdown_signal().await;

    let _ = shutdown_tx.send(true);
    if let Err(e) = scheduler.shutdown().await {
        warn!("Scheduler shutdown failed: {}", e);
    }
    let _ = command_queue.await;
    state.daemon.disconnect().await;
    info!("Bye");

    Ok(())
}
