use crate::config::AppConfig;
use crate::errors::ServiceError;
use metrics::{counter, gauge};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use std::time::Duration;
use tracing::{debug, error, info};

/// Alias so call sites stay agnostic about the concrete sea-orm pool type.
pub type DbPool = DatabaseConnection;

/// Pool tuning knobs, independent of where the values came from.
///
/// `Default` suits tests and small deployments; real deployments load an
/// [`AppConfig`] and convert it with `DbConfig::from`.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    pub acquire_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            acquire_timeout: Duration::from_secs(8),
        }
    }
}

impl From<&AppConfig> for DbConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            url: cfg.database_url.clone(),
            max_connections: cfg.db_max_connections,
            min_connections: cfg.db_min_connections,
            connect_timeout: Duration::from_secs(cfg.db_connect_timeout_secs),
            idle_timeout: Duration::from_secs(cfg.db_idle_timeout_secs),
            acquire_timeout: Duration::from_secs(cfg.db_acquire_timeout_secs),
        }
    }
}

/// Connects with default tuning. Shorthand for tests and one-off tools.
pub async fn establish_connection(database_url: &str) -> Result<DbPool, ServiceError> {
    establish_connection_with_config(&DbConfig {
        url: database_url.to_string(),
        ..DbConfig::default()
    })
    .await
}

/// Opens the connection pool described by `config`.
///
/// # Errors
/// `ServiceError::TransactionFailure` when the store is unreachable or the
/// URL is malformed.
pub async fn establish_connection_with_config(config: &DbConfig) -> Result<DbPool, ServiceError> {
    debug!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Opening database pool"
    );

    let mut options = ConnectOptions::new(config.url.clone());
    options
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(config.connect_timeout)
        .idle_timeout(config.idle_timeout)
        .acquire_timeout(config.acquire_timeout)
        .sqlx_logging(true);

    let pool = Database::connect(options)
        .await
        .map_err(ServiceError::TransactionFailure)?;

    gauge!("stockbook_db.max_connections", config.max_connections as f64);
    info!(
        max_connections = config.max_connections,
        "Database pool ready"
    );
    Ok(pool)
}

/// Pool built from application settings.
pub async fn establish_connection_from_app_config(cfg: &AppConfig) -> Result<DbPool, ServiceError> {
    establish_connection_with_config(&cfg.into()).await
}

/// Loads configuration and opens the pool in one step.
pub async fn create_db_pool() -> Result<DbPool, ServiceError> {
    let cfg = crate::config::load_config()
        .map_err(|e| ServiceError::db_error(format!("Failed to load config: {}", e)))?;
    establish_connection_from_app_config(&cfg).await
}

/// Brings the schema up to date with the embedded migrations.
pub async fn run_migrations(pool: &DbPool) -> Result<(), ServiceError> {
    let started = std::time::Instant::now();
    crate::migrator::Migrator::up(pool, None).await.map_err(|e| {
        error!(elapsed = ?started.elapsed(), "Migrations failed: {}", e);
        ServiceError::TransactionFailure(e)
    })?;
    info!(elapsed = ?started.elapsed(), "Migrations applied");
    Ok(())
}

/// Pings the store; used by health probes and the test harness.
pub async fn check_connection(pool: &DbPool) -> Result<(), ServiceError> {
    let started = std::time::Instant::now();
    match pool.ping().await {
        Ok(()) => {
            gauge!(
                "stockbook_db.connection_latency",
                started.elapsed().as_millis() as f64
            );
            debug!(elapsed = ?started.elapsed(), "Database ping ok");
            Ok(())
        }
        Err(e) => {
            counter!("stockbook_db.connection_failures", 1);
            error!("Database ping failed: {}", e);
            Err(ServiceError::TransactionFailure(e))
        }
    }
}

/// Drains and closes the pool. Call on shutdown once writers have stopped.
pub async fn close_pool(pool: DbPool) -> Result<(), ServiceError> {
    info!("Closing database pool");
    pool.close().await.map_err(ServiceError::TransactionFailure)
}
