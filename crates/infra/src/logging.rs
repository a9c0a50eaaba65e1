use crate::config::AppConfig;
use anyhow::Result;
use tracing_subscriber::{EnvFilter, fmt};

/// Installs the global subscriber. `service` is stamped on every event so the
/// two services' logs can share a sink.
pub fn init_tracing(config: &AppConfig, service: &'static str) -> Result<()> {
    let filter =
        EnvFilter::try_new(config.log_level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.is_production() {
        fmt()
            .with_env_filter(filter)
            .json()
            .with_target(false)
            .with_current_span(true)
            .try_init()
            .map_err(|err| anyhow::anyhow!(err))?;
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .try_init()
            .map_err(|err| anyhow::anyhow!(err))?;
    }

    tracing::info!(service, env = %config.app_env, "tracing initialised");
    Ok(())
}
