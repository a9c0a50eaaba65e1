use std::sync::Arc;

use geotrail_domain::ingest::{IngestConfig, IngestCoordinator};
use geotrail_domain::jobs::InMemoryJobQueue;
use geotrail_domain::ports::history::HistoryClient;
use geotrail_domain::ports::jobs::JobQueue;
use geotrail_domain::ports::proximity::ProximityRepository;
use geotrail_domain::proximity::{InMemoryProximityRepository, ProximityService};
use geotrail_domain::replay::ReplayService;
use geotrail_infra::config::AppConfig;
use geotrail_infra::db::{DbConfig, HealthProbe, MemoryProbe, SurrealAdapter};
use geotrail_infra::history_client::HttpHistoryClient;
use geotrail_infra::jobs::RedisJobQueue;
use geotrail_infra::repositories::SurrealProximityRepository;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub ingest: IngestCoordinator,
    pub proximity: ProximityService,
    pub history: Arc<dyn HistoryClient>,
    pub replay: ReplayService,
    pub health: Arc<dyn HealthProbe>,
    /// True when no separate worker drains the replay queue.
    pub in_process_replay: bool,
}

impl AppState {
    pub async fn new(config: AppConfig) -> anyhow::Result<Self> {
        let history: Arc<dyn HistoryClient> = Arc::new(HttpHistoryClient::from_config(&config));

        if config.uses_surreal() {
            let db_config = DbConfig::from_app_config(&config)?;
            let positions = SurrealProximityRepository::new(&db_config).await?;
            let queue = RedisJobQueue::connect_with_prefix(
                &config.redis_url,
                config.replay_queue_prefix.clone(),
            )
            .await?;
            let mut state = Self::with_dependencies(
                config,
                Arc::new(positions),
                history,
                Arc::new(queue),
                Arc::new(SurrealAdapter::new(db_config)),
            );
            state.in_process_replay = false;
            return Ok(state);
        }

        tracing::warn!("memory backend selected; positions and replay jobs are not durable");
        Ok(Self::with_dependencies(
            config,
            Arc::new(InMemoryProximityRepository::new()),
            history,
            Arc::new(InMemoryJobQueue::new()),
            Arc::new(MemoryProbe),
        ))
    }

    pub fn with_dependencies(
        config: AppConfig,
        positions: Arc<dyn ProximityRepository>,
        history: Arc<dyn HistoryClient>,
        queue: Arc<dyn JobQueue>,
        health: Arc<dyn HealthProbe>,
    ) -> Self {
        let replay = ReplayService::new(queue, history.clone(), config.replay_config());
        let ingest = IngestCoordinator::new(
            positions.clone(),
            history.clone(),
            replay.clone(),
            IngestConfig {
                remote_timeout: config.history_call_budget(),
            },
        );
        Self {
            config,
            ingest,
            proximity: ProximityService::new(positions),
            history,
            replay,
            health,
            in_process_replay: true,
        }
    }
}
