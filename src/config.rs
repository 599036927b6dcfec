//! Application configuration
//!
//! Read once at startup from a TOML file and passed by value into the pool
//! and the coordinator. Every section and field is optional:
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8080"
//!
//! [database]
//! driver = "postgres"
//! url = "postgres://localhost:5432/ledger"
//! user = "ledger"
//! password = "secret"
//! seed_file = "accounts.csv"
//!
//! [pool]
//! max_resources = 8
//! max_wait_millis = 1000
//! max_attempts = 3
//! ```

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failure to load or validate the configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Complete application configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub pool: PoolConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Address the HTTP server listens on
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// Storage backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    /// PostgreSQL through `sqlx`
    #[default]
    Postgres,
    /// In-process transactional store, lost on exit
    Memory,
}

/// Storage connection parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub driver: Driver,

    #[serde(default = "default_url")]
    pub url: String,

    /// Overrides the user in `url` when not empty
    #[serde(default)]
    pub user: String,

    /// Overrides the password in `url` when not empty
    #[serde(default)]
    pub password: String,

    /// CSV file with `id,amount` rows to seed the store with
    #[serde(default)]
    pub seed_file: Option<PathBuf>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: Driver::default(),
            url: default_url(),
            user: String::new(),
            password: String::new(),
            seed_file: None,
        }
    }
}

/// Pool size and acquisition retry budget
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolConfig {
    /// Maximum number of connections checked out at once
    #[serde(default = "default_max_resources")]
    pub max_resources: usize,

    /// How long one acquisition attempt waits for a free connection
    #[serde(default = "default_max_wait_millis")]
    pub max_wait_millis: u64,

    /// Failed attempts allowed per failure cause
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_resources: default_max_resources(),
            max_wait_millis: default_max_wait_millis(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_url() -> String {
    "postgres://localhost:5432/ledger".to_string()
}

fn default_max_resources() -> usize {
    num_cpus::get() * 2
}

fn default_max_wait_millis() -> u64 {
    1000
}

fn default_max_attempts() -> u32 {
    3
}

impl AppConfig {
    /// Load and validate a configuration file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the TOML file
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file can not be read, is not valid TOML
    /// for this structure, or fails [`validate`](Self::validate).
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: AppConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that deserialize fine but can not work
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.max_resources == 0 {
            return Err(ConfigError::Invalid(
                "pool.max_resources must be at least 1".to_string(),
            ));
        }
        if self.pool.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "pool.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.database.driver == Driver::Postgres && self.database.url.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "database.url is required for the postgres driver".to_string(),
            ));
        }
        Ok(())
    }
}
