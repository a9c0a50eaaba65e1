mod observability;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use geotrail_domain::replay::ReplayService;
use geotrail_infra::history_client::HttpHistoryClient;
use geotrail_infra::jobs::RedisJobQueue;
use geotrail_infra::{config::AppConfig, logging::init_tracing};
use tokio::sync::watch;
use tracing::info;

const DEQUEUE_TIMEOUT: Duration = Duration::from_secs(1);
const QUEUE_DEPTH_INTERVAL: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config, "geotrail-worker")?;
    config.validate().inspect_err(|err| {
        tracing::error!(error = %err, "invalid configuration");
    })?;

    if !config.uses_surreal() {
        info!("memory backend: replays run inside the management service, nothing to drain");
        return Ok(());
    }

    observability::init_metrics(SocketAddr::from(([0, 0, 0, 0], config.worker_metrics_port)))?;

    let queue = RedisJobQueue::connect_with_prefix(
        &config.redis_url,
        config.replay_queue_prefix.clone(),
    )
    .await?;
    // Assumes a single worker: anything left in processing belongs to a crashed predecessor.
    let requeued = queue.requeue_processing(usize::MAX).await?;
    if requeued > 0 {
        info!(requeued, "requeued replay jobs left in processing");
    }

    let history = Arc::new(HttpHistoryClient::from_config(&config));
    let replay = ReplayService::new(Arc::new(queue.clone()), history, config.replay_config());

    let (stop_tx, stop_rx) = watch::channel(false);
    let depth_reporter = tokio::spawn(report_queue_depth(queue, stop_rx));

    info!(
        prefix = %config.replay_queue_prefix,
        max_attempts = config.replay_max_attempts,
        "worker started"
    );
    replay
        .run_until(
            config.drain_settings(DEQUEUE_TIMEOUT),
            shutdown_signal(),
            observability::register_replay,
        )
        .await;

    let _ = stop_tx.send(true);
    let _ = depth_reporter.await;
    info!("worker shutdown");
    Ok(())
}

async fn report_queue_depth(queue: RedisJobQueue, mut stop: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(QUEUE_DEPTH_INTERVAL);
    loop {
        tokio::select! {
            _ = stop.changed() => return,
            _ = ticker.tick() => {}
        }
        match queue.snapshot().await {
            Ok(snapshot) => observability::set_queue_depth_gauge(&snapshot),
            Err(err) => tracing::warn!(error = %err, "queue snapshot failed"),
        }
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
