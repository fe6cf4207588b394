use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_DB_MIN_CONNECTIONS: u32 = 1;
const CONFIG_DIR: &str = "config";

/// Application configuration structure
#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Maximum number of database connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// Minimum number of database connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// Run pending migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// Host the HTTP transport binds to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port the HTTP transport binds to
    #[serde(default = "default_port")]
    pub port: u16,

    /// Deployment environment name ("development", "production", "test")
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Log level filter when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit logs as JSON lines instead of human-readable text
    #[serde(default)]
    pub log_json: bool,
}

fn default_db_max_connections() -> u32 {
    DEFAULT_DB_MAX_CONNECTIONS
}

fn default_db_min_connections() -> u32 {
    DEFAULT_DB_MIN_CONNECTIONS
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl AppConfig {
    /// Constructs a configuration directly, bypassing file and environment
    /// sources. Used by tests and embedding callers.
    pub fn new(database_url: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            db_min_connections: DEFAULT_DB_MIN_CONNECTIONS,
            auto_migrate: false,
            host: default_host(),
            port: DEFAULT_PORT,
            environment: environment.into(),
            log_level: default_log_level(),
            log_json: false,
        }
    }

    /// Loads configuration from `config/default`, `config/{APP_ENV}`, and
    /// `POS__`-prefixed environment variables, later sources overriding
    /// earlier ones.
    pub fn load() -> Result<Self, ConfigError> {
        let environment = env::var("APP_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());

        let config: AppConfig = Config::builder()
            .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
            .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, environment)).required(false))
            .add_source(Environment::with_prefix("POS").separator("__"))
            .set_default("environment", environment)?
            .build()?
            .try_deserialize()?;

        config.validate_config()?;
        Ok(config)
    }

    fn validate_config(&self) -> Result<(), ConfigError> {
        if self.database_url.is_empty() {
            return Err(ConfigError::Message("database_url must not be empty".into()));
        }
        if self.db_max_connections < self.db_min_connections {
            return Err(ConfigError::Message(
                "db_max_connections must be >= db_min_connections".into(),
            ));
        }
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}
