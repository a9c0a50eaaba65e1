use std::time::Duration;

use geotrail_domain::replay::{DrainSettings, ReplayConfig};
use serde::Deserialize;

pub const BACKEND_MEMORY: &str = "memory";
pub const BACKEND_SURREAL: &str = "surreal";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app_env: String,
    pub port: u16,
    pub history_port: u16,
    pub request_timeout_ms: u64,
    pub log_level: String,
    pub data_backend: String,
    pub surreal_endpoint: String,
    pub surreal_ns: String,
    pub surreal_db: String,
    // Never defaulted: a surreal deployment without credentials must not start.
    pub surreal_user: Option<String>,
    pub surreal_pass: Option<String>,
    pub redis_url: String,
    pub history_base_url: String,
    pub history_timeout_ms: u64,
    pub history_retry_max_attempts: u32,
    pub history_retry_backoff_base_ms: u64,
    pub history_retry_backoff_max_ms: u64,
    pub replay_queue_prefix: String,
    pub replay_max_attempts: u32,
    pub replay_backoff_base_ms: u64,
    pub replay_backoff_max_ms: u64,
    pub worker_poll_interval_ms: u64,
    pub worker_promote_batch: usize,
    pub worker_metrics_port: u16,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),
    #[error("unknown data_backend '{0}' (expected memory or surreal)")]
    UnknownBackend(String),
    #[error("{0} must be set when data_backend=surreal")]
    MissingCredential(&'static str),
    #[error(
        "request_timeout_ms ({request_ms}ms) must exceed the history call budget ({budget_ms}ms)"
    )]
    RequestTimeoutTooShort { request_ms: u64, budget_ms: u128 },
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let cfg = config::Config::builder()
            .set_default("app_env", "development")?
            .set_default("port", 8080)?
            .set_default("history_port", 50051)?
            .set_default("request_timeout_ms", 30000)?
            .set_default("log_level", "info")?
            .set_default("data_backend", BACKEND_MEMORY)?
            .set_default("surreal_endpoint", "ws://127.0.0.1:8000")?
            .set_default("surreal_ns", "geotrail")?
            .set_default("surreal_db", "locations")?
            .set_default("redis_url", "redis://127.0.0.1:6379")?
            .set_default("history_base_url", "http://127.0.0.1:50051")?
            .set_default("history_timeout_ms", 5000)?
            .set_default("history_retry_max_attempts", 2)?
            .set_default("history_retry_backoff_base_ms", 100)?
            .set_default("history_retry_backoff_max_ms", 1000)?
            .set_default("replay_queue_prefix", "geotrail:replay")?
            .set_default("replay_max_attempts", 10)?
            .set_default("replay_backoff_base_ms", 1000)?
            .set_default("replay_backoff_max_ms", 300000)?
            .set_default("worker_poll_interval_ms", 1000)?
            .set_default("worker_promote_batch", 50)?
            .set_default("worker_metrics_port", 9102)?
            .add_source(config::Environment::default().separator("__"))
            .build()?;
        Ok(cfg.try_deserialize()?)
    }

    /// Rejects combinations that would only fail later, at first use.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // An ingest must finish its remote leg before the HTTP timeout answers for it.
        let budget = self.history_call_budget();
        if self.request_timeout() <= budget {
            return Err(ConfigError::RequestTimeoutTooShort {
                request_ms: self.request_timeout_ms,
                budget_ms: budget.as_millis(),
            });
        }

        match self.data_backend.as_str() {
            BACKEND_MEMORY => Ok(()),
            BACKEND_SURREAL => {
                if blank(&self.surreal_user) {
                    return Err(ConfigError::MissingCredential("SURREAL_USER"));
                }
                if blank(&self.surreal_pass) {
                    return Err(ConfigError::MissingCredential("SURREAL_PASS"));
                }
                Ok(())
            }
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }

    pub fn uses_surreal(&self) -> bool {
        self.data_backend == BACKEND_SURREAL
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Upper bound for one remote call including the client's own retries.
    pub fn history_call_budget(&self) -> Duration {
        let attempts = u64::from(self.history_retry_max_attempts.max(1));
        let per_attempt = self.history_timeout_ms.max(1);
        let backoff = self
            .history_retry_backoff_max_ms
            .saturating_mul(attempts - 1);
        Duration::from_millis(per_attempt.saturating_mul(attempts).saturating_add(backoff))
    }

    pub fn replay_config(&self) -> ReplayConfig {
        ReplayConfig {
            max_attempts: self.replay_max_attempts,
            backoff_base_ms: self.replay_backoff_base_ms,
            backoff_max_ms: self.replay_backoff_max_ms,
            remote_timeout: self.history_call_budget(),
        }
    }

    /// `dequeue_timeout` is zero for the in-memory queue, which cannot block.
    pub fn drain_settings(&self, dequeue_timeout: Duration) -> DrainSettings {
        DrainSettings {
            poll_interval: Duration::from_millis(self.worker_poll_interval_ms.max(1)),
            promote_batch: self.worker_promote_batch.max(1),
            dequeue_timeout,
        }
    }
}

fn blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(|value| value.trim().is_empty())
}

#[cfg(test)]
pub(crate) fn test_config() -> AppConfig {
    AppConfig {
        app_env: "test".to_string(),
        port: 0,
        history_port: 0,
        request_timeout_ms: 30_000,
        log_level: "debug".to_string(),
        data_backend: BACKEND_MEMORY.to_string(),
        surreal_endpoint: "ws://127.0.0.1:8000".to_string(),
        surreal_ns: "geotrail".to_string(),
        surreal_db: "locations".to_string(),
        surreal_user: None,
        surreal_pass: None,
        redis_url: "redis://127.0.0.1:6379".to_string(),
        history_base_url: "http://127.0.0.1:50051".to_string(),
        history_timeout_ms: 1000,
        history_retry_max_attempts: 2,
        history_retry_backoff_base_ms: 1,
        history_retry_backoff_max_ms: 5,
        replay_queue_prefix: "geotrail:replay".to_string(),
        replay_max_attempts: 3,
        replay_backoff_base_ms: 10,
        replay_backoff_max_ms: 100,
        worker_poll_interval_ms: 10,
        worker_promote_batch: 10,
        worker_metrics_port: 0,
    }
}
