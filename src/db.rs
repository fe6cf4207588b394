use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::migrator::Migrator;
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use sea_orm_migration::MigratorTrait;
use std::time::Duration;
use tracing::info;

/// Type alias for a database connection pool
pub type DbPool = DatabaseConnection;

/// Configuration for database connection
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Database connection URL
    pub url: String,
    /// Maximum number of connections
    pub max_connections: u32,
    /// Minimum number of connections
    pub min_connections: u32,
    /// Connection timeout duration
    pub connect_timeout: Duration,
    /// Idle timeout duration
    pub idle_timeout: Duration,
    /// Acquire connection timeout
    pub acquire_timeout: Duration,
    /// Log every SQL statement at debug level
    pub sqlx_logging: bool,
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
            sqlx_logging: false,
        }
    }
}

impl DbConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            url: config.database_url.clone(),
            max_connections: config.db_max_connections,
            min_connections: config.db_min_connections,
            sqlx_logging: !config.is_production(),
            ..Default::default()
        }
    }
}

/// Establishes a connection pool to the database
pub async fn connect(config: &DbConfig) -> Result<DbPool, DbErr> {
    let mut options = ConnectOptions::new(config.url.clone());
    options
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(config.connect_timeout)
        .idle_timeout(config.idle_timeout)
        .acquire_timeout(config.acquire_timeout)
        .sqlx_logging(config.sqlx_logging);

    let pool = Database::connect(options).await?;
    info!(
        max_connections = config.max_connections,
        "Database connection pool established"
    );
    Ok(pool)
}

/// Applies any pending schema migrations.
pub async fn run_migrations(pool: &DbPool) -> Result<(), ServiceError> {
    Migrator::up(pool, None).await?;
    info!("Database migrations applied");
    Ok(())
}

/// Connects using application configuration and, when `auto_migrate` is set,
/// brings the schema up to date.
pub async fn establish_connection(config: &AppConfig) -> Result<DbPool, ServiceError> {
    let pool = connect(&DbConfig::from_app_config(config)).await?;
    if config.auto_migrate {
        run_migrations(&pool).await?;
    }
    Ok(pool)
}
