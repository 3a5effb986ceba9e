use crate::config::AppConfig;
use crate::errors::ServiceError;
use metrics::{counter, gauge};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Shared connection pool handed to every service
pub type DbPool = DatabaseConnection;

/// Pool tuning, derived from [`AppConfig`] in production and built by hand in tests.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    pub acquire_timeout: Duration,
    /// Log every statement through sqlx
    pub statement_logging: bool,
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
            statement_logging: false,
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
            statement_logging: cfg.log_level.eq_ignore_ascii_case("trace"),
        }
    }
}

impl DbConfig {
    /// Backend named by the URL scheme, for logs.
    pub fn backend(&self) -> &'static str {
        match self.url.split_once(':').map(|(scheme, _)| scheme) {
            Some("sqlite") => "sqlite",
            Some("postgres") | Some("postgresql") => "postgres",
            _ => "unknown",
        }
    }

    /// An in-memory SQLite database lives and dies with a single connection.
    fn is_memory_sqlite(&self) -> bool {
        self.backend() == "sqlite" && self.url.contains(":memory:")
    }
}

/// Opens the pool described by `config`.
///
/// # Errors
/// `ServiceError::DatabaseError` when the first connection cannot be made
pub async fn establish_connection_with_config(config: &DbConfig) -> Result<DbPool, ServiceError> {
    let backend = config.backend();
    let mut max_connections = config.max_connections;
    if config.is_memory_sqlite() && max_connections > 1 {
        warn!("In-memory SQLite is per connection; limiting the pool to one connection");
        max_connections = 1;
    }
    let min_connections = config.min_connections.min(max_connections);

    let mut opt = ConnectOptions::new(config.url.clone());
    opt.max_connections(max_connections)
        .min_connections(min_connections)
        .connect_timeout(config.connect_timeout)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .sqlx_logging(config.statement_logging);

    debug!(backend, max_connections, min_connections, "Opening database pool");
    gauge!("storefront.db.max_connections", max_connections as f64);

    let pool = Database::connect(opt).await.map_err(|e| {
        error!(backend, "Could not open database pool: {}", e);
        counter!("storefront.db.connect_failures", 1);
        ServiceError::DatabaseError(e)
    })?;

    info!(backend, max_connections, "Database pool ready");
    Ok(pool)
}

/// Opens the pool with the tuning from `cfg`.
pub async fn establish_connection_from_app_config(cfg: &AppConfig) -> Result<DbPool, ServiceError> {
    establish_connection_with_config(&DbConfig::from(cfg)).await
}

/// Applies pending embedded migrations. Already-applied migrations are skipped.
pub async fn run_migrations(pool: &DbPool) -> Result<(), ServiceError> {
    let started = Instant::now();
    let pending = crate::migrator::Migrator::get_pending_migrations(pool)
        .await
        .map_err(ServiceError::DatabaseError)?
        .len();
    if pending == 0 {
        debug!("Schema is up to date");
        return Ok(());
    }

    info!(pending, "Applying database migrations");
    crate::migrator::Migrator::up(pool, None).await.map_err(|e| {
        error!(elapsed = ?started.elapsed(), "Migrations failed: {}", e);
        ServiceError::DatabaseError(e)
    })?;

    info!(pending, elapsed = ?started.elapsed(), "Migrations applied");
    Ok(())
}

/// Round-trips a ping; feeds the `/health` endpoint.
pub async fn check_connection(pool: &DbPool) -> Result<(), ServiceError> {
    let started = Instant::now();
    match pool.ping().await {
        Ok(()) => {
            gauge!(
                "storefront.db.ping_ms",
                started.elapsed().as_millis() as f64
            );
            Ok(())
        }
        Err(e) => {
            warn!(elapsed = ?started.elapsed(), "Database ping failed: {}", e);
            counter!("storefront.db.ping_failures", 1);
            Err(ServiceError::DatabaseError(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrations_apply_once_and_pool_pings() {
        let config = DbConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 4,
            ..Default::default()
        };
        let pool = establish_connection_with_config(&config).await.unwrap();
        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();
        check_connection(&pool).await.unwrap();
    }

    #[test]
    fn db_config_follows_app_config_tuning() {
        let mut app = AppConfig::new(
            "postgres://storefront@localhost/storefront".into(),
            "s".repeat(64),
            "127.0.0.1".into(),
            8080,
            "development".into(),
        );
        app.db_max_connections = 3;
        app.db_acquire_timeout_secs = 2;
        let cfg = DbConfig::from(&app);
        assert_eq!(cfg.backend(), "postgres");
        assert_eq!(cfg.max_connections, 3);
        assert_eq!(cfg.acquire_timeout, Duration::from_secs(2));
        assert!(!cfg.statement_logging);
    }

    #[test]
    fn memory_sqlite_is_detected() {
        let cfg = DbConfig {
            url: "sqlite::memory:".into(),
            ..Default::default()
        };
        assert_eq!(cfg.backend(), "sqlite");
        assert!(cfg.is_memory_sqlite());

        let file = DbConfig {
            url: "sqlite://storefront.db?mode=rwc".into(),
            ..Default::default()
        };
        assert!(!file.is_memory_sqlite());
    }
}
