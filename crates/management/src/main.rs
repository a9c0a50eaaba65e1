mod observability;
mod routes;
mod state;

use std::net::SocketAddr;
use std::time::Duration;

use geotrail_infra::{config::AppConfig, logging::init_tracing};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config, "geotrail-management")?;
    config.validate().inspect_err(|err| {
        tracing::error!(error = %err, "invalid configuration");
    })?;
    geotrail_infra::observability::init_metrics()?;

    let state = state::AppState::new(config.clone()).await?;

    // Memory deployments have no worker process, so replays run here.
    let (stop_tx, mut stop_rx) = watch::channel(false);
    let reconciler = state.in_process_replay.then(|| {
        let replay = state.replay.clone();
        let settings = config.drain_settings(Duration::ZERO);
        tokio::spawn(async move {
            let shutdown = async move {
                let _ = stop_rx.changed().await;
            };
            replay
                .run_until(settings, shutdown, observability::register_replay_result)
                .await;
        })
    });

    let app = routes::router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(%addr, backend = %config.data_backend, "starting management service");

    let listener = TcpListener::bind(addr).await?;
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .inspect_err(|err| tracing::error!(error = %err, "server exited"));

    let _ = stop_tx.send(true);
    if let Some(handle) = reconciler {
        let _ = handle.await;
    }
    served?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
