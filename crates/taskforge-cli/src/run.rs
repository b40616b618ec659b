//! `taskforge run`: starts the Poller and Stale-Lock Reaper for this
//! replica and drains in-flight work on shutdown (§5).

use std::sync::Arc;

use anyhow::Result;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use taskforge_core::alert::AlertSink;
use taskforge_core::config::EngineConfig;
use taskforge_core::executor::Executor;
use taskforge_core::handler::{self, HttpHandlerConfig};
use taskforge_core::poller::Poller;
use taskforge_core::reaper::Reaper;

/// Run the scheduling engine (Poller + Reaper) until Ctrl-C/SIGTERM, then
/// wait out `shutdown_grace` for in-flight executions to finish draining.
pub async fn run_replica(pool: PgPool, config: EngineConfig) -> Result<()> {
    let http = HttpHandlerConfig::new(
        config.handler_urls.orders_service_url.clone(),
        config.handler_urls.payments_service_url.clone(),
    );
    let registry = Arc::new(handler::default_registry(http));
    let alert_sink = AlertSink::new(config.alert.clone());
    let executor = Executor::new(pool.clone(), registry, alert_sink);

    let poller = Poller::new(pool.clone(), executor, config.clone());
    let reaper = Reaper::new(pool.clone(), config.clone());

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        tracing::info!("shutdown signal received, draining in-flight work");
        signal_token.cancel();
    });

    let poller_shutdown = shutdown.clone();
    let reaper_shutdown = shutdown.clone();
    let (poller_result, reaper_result) = tokio::join!(
        poller.run(poller_shutdown),
        reaper.run(reaper_shutdown),
    );
    let _ = (poller_result, reaper_result);

    tracing::info!(grace = ?config.shutdown_grace, "waiting out shutdown grace window");
    tokio::time::sleep(config.shutdown_grace).await;

    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl-C handler");
}
