//! Configuration types for qmill.
//!
//! Configuration is loaded from a YAML file with two required blocks,
//! `redis` (queue backend) and `database` (connection pool), plus optional
//! `workers` and `logging` blocks. Loading and validation happen before any
//! worker starts; a broken file aborts startup.
//!
//! ```yaml
//! redis:
//!   host: 127.0.0.1
//!   namespace: qmill
//! database:
//!   user: app
//!   password: secret
//!   host: 127.0.0.1
//!   dbname: app
//!   max_connections: 50
//! workers:
//!   message_key: message
//!   dead_letter_key: dead-letter
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Hard cap on the worker count accepted by the CLI.
pub const MAX_WORKERS: usize = 50;

/// Top-level configuration, one field per YAML block.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Queue backend connection parameters
    pub redis: RedisConfig,

    /// Database connection pool parameters
    pub database: DatabaseConfig,

    /// Worker loop settings
    #[serde(default)]
    pub workers: WorkerSettings,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load and validate configuration from a YAML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::config_with(
                format!("cannot read configuration file {}", path.display()),
                e,
            )
        })?;

        let config: Config = serde_yaml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would misbehave at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.redis.namespace.is_empty() {
            return Err(Error::config("redis.namespace must not be empty"));
        }
        if self.database.max_connections == 0 {
            return Err(Error::config(
                "database.max_connections must be greater than 0",
            ));
        }
        if self.workers.message_key.is_empty() {
            return Err(Error::config("workers.message_key must not be empty"));
        }
        if self
            .workers
            .dead_letter_key
            .as_deref()
            .is_some_and(|k| k == self.workers.message_key)
        {
            return Err(Error::config(
                "workers.dead_letter_key must differ from workers.message_key",
            ));
        }
        Ok(())
    }
}

/// Queue backend (Redis) connection parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis host
    pub host: String,

    /// Redis port
    #[serde(default = "default_redis_port")]
    pub port: u16,

    /// Redis database number
    #[serde(default)]
    pub db: i64,

    /// Namespace prefixing every key this process touches
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

impl RedisConfig {
    /// Render the connection URL understood by the `redis` crate.
    pub fn url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.db)
    }
}

/// Database connection pool parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Database user
    pub user: String,

    /// Database password
    pub password: String,

    /// Database host
    pub host: String,

    /// Database port
    #[serde(default = "default_database_port")]
    pub port: u16,

    /// Database name
    pub dbname: String,

    /// Upper bound on pooled connections; workers block on acquire once
    /// this many are checked out
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

/// Worker loop settings.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSettings {
    /// Logical key the workers block on
    #[serde(default = "default_message_key")]
    pub message_key: String,

    /// Logical key receiving undecodable or failed payloads; `None` drops
    /// them with a log line only
    #[serde(default)]
    pub dead_letter_key: Option<String>,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            message_key: default_message_key(),
            dead_letter_key: None,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default level filter; the RUST_LOG environment variable wins
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_redis_port() -> u16 {
    6379
}

fn default_namespace() -> String {
    "qmill".to_string()
}

fn default_database_port() -> u16 {
    5432
}

fn default_max_connections() -> u32 {
    50
}

fn default_message_key() -> String {
    "message".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}
