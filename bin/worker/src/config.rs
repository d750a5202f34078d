//! Worker configuration.
//!
//! Loaded via the `config` crate from an optional TOML file overlaid with
//! environment variables. Nested keys use `__`, e.g.
//! `ENGINE__EXECUTION_ORDER=topological`.

use config::{Config, ConfigError, Environment, File};
use innoflow_workflow::EngineConfig;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Worker configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// PostgreSQL database connection URL.
    pub database_url: String,

    /// Delay between polls for pending executions, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Maximum number of executions picked up per poll.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Size of the database connection pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Engine behaviour.
    #[serde(default)]
    pub engine: EngineConfig,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_batch_size() -> usize {
    10
}

fn default_max_connections() -> u32 {
    5
}

impl WorkerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None, environment())
    }

    /// Loads configuration from a TOML file, with environment variables
    /// taking precedence.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or the result is invalid.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::load(Some(path), environment())
    }

    fn load(path: Option<&Path>, environment: Environment) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder
            .add_source(environment)
            .build()?
            .try_deserialize()
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn environment() -> Environment {
    Environment::default().separator("__").try_parsing(true)
}
