mod api;
mod error;
mod live_events;
mod main_lib;
mod oauth_state;
mod scheduler;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use lmsbridge_core::LmsConfig;

use crate::main_lib::{build_state, AppState};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Resolves on Ctrl-C after telling the consumer, scheduler and running
/// syncs to stop.
async fn shutdown_signal(state: Arc<AppState>, shutdown: watch::Sender<bool>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutdown requested");
    state.orchestrator.cancel();
    let _ = shutdown.send(true);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = LmsConfig::from_env()?;
    let addr: SocketAddr = config.listen_addr.parse()?;
    let sync_interval = config.sync_interval_secs;

    let (state, consumer) = build_state(config).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let consumer_task = tokio::spawn({
        let shutdown = shutdown_rx.clone();
        async move { consumer.run(shutdown).await }
    });

    let scheduler_task = (sync_interval > 0).then(|| {
        tokio::spawn(scheduler::run_periodic_sync(
            state.clone(),
            Duration::from_secs(sync_interval),
            shutdown_rx.clone(),
        ))
    });

    let app = api::app_router(state.clone());
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state, shutdown_tx))
        .await?;

    match consumer_task.await {
        Ok(Ok(stats)) => info!(
            "Consumer stopped: {} processed, {} failed, {} reclaimed, {} dead-lettered",
            stats.processed, stats.failed, stats.reclaimed, stats.dead_lettered
        ),
        Ok(Err(e)) => error!("Consumer stopped with error: {}", e),
        Err(e) => error!("Consumer task panicked: {}", e),
    }
    if let Some(task) = scheduler_task {
        if let Err(e) = task.await {
            error!("Scheduler task panicked: {}", e);
        }
    }

    info!("Server stopped");
    Ok(())
}
