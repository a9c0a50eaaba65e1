use std::sync::Arc;

use geotrail_domain::idempotency::{IdempotencyConfig, IdempotencyService, InMemoryIdempotencyStore};
use geotrail_domain::locations::InMemoryLocationStore;
use geotrail_domain::ports::idempotency::IdempotencyStore;
use geotrail_domain::ports::locations::LocationStore;
use geotrail_domain::recording::PingRecorder;
use geotrail_domain::travel::TravelDistanceService;
use geotrail_infra::config::AppConfig;
use geotrail_infra::db::{DbConfig, HealthProbe, MemoryProbe, SurrealAdapter};
use geotrail_infra::idempotency::{DEFAULT_PREFIX, RedisIdempotencyStore};
use geotrail_infra::repositories::SurrealLocationStore;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub recorder: PingRecorder,
    pub travel: TravelDistanceService,
    pub health: Arc<dyn HealthProbe>,
}

impl AppState {
    pub async fn new(config: AppConfig) -> anyhow::Result<Self> {
        if config.uses_surreal() {
            let db_config = DbConfig::from_app_config(&config)?;
            let store = SurrealLocationStore::new(&db_config).await?;
            let idempotency = RedisIdempotencyStore::connect(&config.redis_url).await?;
            return Ok(Self::with_dependencies(
                config,
                Arc::new(store),
                Arc::new(idempotency),
                Arc::new(SurrealAdapter::new(db_config)),
            ));
        }

        tracing::warn!("memory backend selected; location history is not durable");
        Ok(Self::with_dependencies(
            config,
            Arc::new(InMemoryLocationStore::new()),
            Arc::new(InMemoryIdempotencyStore::new(DEFAULT_PREFIX)),
            Arc::new(MemoryProbe),
        ))
    }

    pub fn with_dependencies(
        config: AppConfig,
        store: Arc<dyn LocationStore>,
        idempotency: Arc<dyn IdempotencyStore>,
        health: Arc<dyn HealthProbe>,
    ) -> Self {
        let idempotency = IdempotencyService::new(idempotency, IdempotencyConfig::default());
        Self {
            config,
            recorder: PingRecorder::new(store.clone(), idempotency),
            travel: TravelDistanceService::new(store),
            health,
        }
    }
}
