use std::sync::Arc;
use std::time::Duration;

use geotrail_domain::ports::BoxFuture;
use geotrail_domain::ports::locations::StorageError;
use surrealdb::Surreal;
use surrealdb::engine::remote::ws::{Client, Ws};
use surrealdb::opt::auth::Root;
use tokio::net::TcpStream;
use tokio::time::timeout;
use url::Url;

use crate::config::AppConfig;

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub endpoint: String,
    pub namespace: String,
    pub database: String,
    pub username: String,
    pub password: String,
}

impl DbConfig {
    /// Fails when credentials are missing; there is no built-in fallback account.
    pub fn from_app_config(config: &AppConfig) -> anyhow::Result<Self> {
        let username = config
            .surreal_user
            .clone()
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("SURREAL_USER is not set"))?;
        let password = config
            .surreal_pass
            .clone()
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("SURREAL_PASS is not set"))?;
        Ok(Self {
            endpoint: config.surreal_endpoint.clone(),
            namespace: config.surreal_ns.clone(),
            database: config.surreal_db.clone(),
            username,
            password,
        })
    }
}

/// Opens a signed-in session scoped to the configured namespace and database.
pub async fn connect(db_config: &DbConfig) -> anyhow::Result<Arc<Surreal<Client>>> {
    let db = Surreal::<Client>::init();
    db.connect::<Ws>(&db_config.endpoint).await?;
    db.signin(Root {
        username: &db_config.username,
        password: &db_config.password,
    })
    .await?;
    db.use_ns(&db_config.namespace)
        .use_db(&db_config.database)
        .await?;
    tracing::info!(
        endpoint = %db_config.endpoint,
        namespace = %db_config.namespace,
        database = %db_config.database,
        "connected to surrealdb"
    );
    Ok(Arc::new(db))
}

/// Readiness probe for the datastore, used by `/health`.
pub trait HealthProbe: Send + Sync {
    fn name(&self) -> &'static str;
    fn health_check(&self) -> BoxFuture<'_, Result<(), StorageError>>;
}

#[derive(Debug, Clone)]
pub struct SurrealAdapter {
    config: DbConfig,
}

impl SurrealAdapter {
    pub fn new(config: DbConfig) -> Self {
        Self { config }
    }
}

impl HealthProbe for SurrealAdapter {
    fn name(&self) -> &'static str {
        "surrealdb"
    }

    fn health_check(&self) -> BoxFuture<'_, Result<(), StorageError>> {
        let endpoint = self.config.endpoint.clone();
        Box::pin(async move {
            let address = parse_socket_address(&endpoint)?;
            let connect = timeout(Duration::from_secs(2), TcpStream::connect(address))
                .await
                .map_err(|_| {
                    StorageError::Unavailable("surreal endpoint connect timed out".to_string())
                })?;
            connect.map_err(|err| {
                StorageError::Unavailable(format!("surreal endpoint connect failed: {err}"))
            })?;
            tracing::debug!(endpoint, "surreal health check succeeded");
            Ok(())
        })
    }
}

/// Process-local data always answers.
#[derive(Debug, Clone, Default)]
pub struct MemoryProbe;

impl HealthProbe for MemoryProbe {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn health_check(&self) -> BoxFuture<'_, Result<(), StorageError>> {
        Box::pin(async { Ok(()) })
    }
}

fn parse_socket_address(endpoint: &str) -> Result<String, StorageError> {
    let normalized = if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("ws://{endpoint}")
    };
    let parsed = Url::parse(&normalized).map_err(|err| {
        StorageError::Unavailable(format!("invalid surreal endpoint '{endpoint}': {err}"))
    })?;

    let host = parsed.host_str().ok_or_else(|| {
        StorageError::Unavailable(format!("missing surreal host in endpoint '{endpoint}'"))
    })?;
    let port = parsed.port().unwrap_or(match parsed.scheme() {
        "wss" | "https" => 443,
        _ => 8000,
    });
    Ok(format!("{host}:{port}"))
}
