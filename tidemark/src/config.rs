//! Explicit configuration for the runner and batch writer.
//!
//! The core never reads process state: everything it needs arrives through
//! [`RunnerConfig`] and [`BatchWriterConfig`]. [`TidemarkConfig`] is the file
//! form used by the CLI (`.tidemark/config.toml`).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::store::MAX_BATCH_ITEMS;

pub const DEFAULT_CHUNK_SIZE: usize = MAX_BATCH_ITEMS;
pub const DEFAULT_BATCH_LOG_EVERY: u64 = 500;
pub const DEFAULT_RUN_LOG_EVERY: u64 = 200;
pub const DEFAULT_TABLE: &str = "stack";
pub const DEFAULT_DATASET: &str = "migration";
pub const DEFAULT_PREFIX: &str = "tidemark";

/// Batch writer options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchWriterConfig {
    /// Records per backend call.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Emit a debug line each time this many more records have been written.
    #[serde(default = "default_batch_log_every")]
    pub log_every: u64,
}

impl Default for BatchWriterConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            log_every: default_batch_log_every(),
        }
    }
}

impl BatchWriterConfig {
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 || self.chunk_size > MAX_BATCH_ITEMS {
            return Err(ConfigError::invalid(format!(
                "batch.chunk_size must be between 1 and {MAX_BATCH_ITEMS}, got {}",
                self.chunk_size
            )));
        }
        if self.log_every == 0 {
            return Err(ConfigError::invalid("batch.log_every must be greater than zero"));
        }
        Ok(())
    }
}

/// Runner options: where the watermark lives and how often to report progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Table holding the watermark and history rows.
    #[serde(default = "default_table")]
    pub table: String,
    /// Dataset the watermark belongs to; used as the partition key.
    #[serde(default = "default_dataset")]
    pub dataset: String,
    /// Emit a debug line each time this many more records have been migrated.
    #[serde(default = "default_run_log_every")]
    pub log_every: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            table: default_table(),
            dataset: default_dataset(),
            log_every: default_run_log_every(),
        }
    }
}

impl RunnerConfig {
    pub fn new(table: impl Into<String>, dataset: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            dataset: dataset.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.table.trim().is_empty() {
            return Err(ConfigError::invalid("migrations.table must not be empty"));
        }
        if self.dataset.trim().is_empty() {
            return Err(ConfigError::invalid("migrations.dataset must not be empty"));
        }
        if self.log_every == 0 {
            return Err(ConfigError::invalid("migrations.log_every must be greater than zero"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSettings {
    #[serde(default = "default_store_url")]
    pub url: String,
    /// Prefix of every key the store writes.
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            prefix: default_prefix(),
        }
    }
}

impl StoreSettings {
    /// The store URL with a `${VAR}` reference expanded from the environment.
    pub fn resolved_url(&self) -> Result<String, ConfigError> {
        let url = expand_env(&self.url)?;
        url::Url::parse(&url).map_err(|err| ConfigError::invalid(format!("store.url is not a valid URL: {err}")))?;
        Ok(url)
    }
}

/// File configuration stored in `.tidemark/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TidemarkConfig {
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub migrations: RunnerConfig,
    #[serde(default)]
    pub batch: BatchWriterConfig,
}

impl TidemarkConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|err| ConfigError::invalid(err.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.prefix.trim().is_empty() {
            return Err(ConfigError::invalid("store.prefix must not be empty"));
        }
        self.migrations.validate()?;
        self.batch.validate()
    }
}

/// Expand a whole-value `${VAR}` reference. Any other value is returned as is.
pub fn expand_env(value: &str) -> Result<String, ConfigError> {
    match value.strip_prefix("${").and_then(|rest| rest.strip_suffix('}')) {
        Some(var) => std::env::var(var).map_err(|_| ConfigError::MissingEnv { var: var.to_string() }),
        None => Ok(value.to_string()),
    }
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_batch_log_every() -> u64 {
    DEFAULT_BATCH_LOG_EVERY
}

fn default_run_log_every() -> u64 {
    DEFAULT_RUN_LOG_EVERY
}

fn default_table() -> String {
    DEFAULT_TABLE.to_string()
}

fn default_dataset() -> String {
    DEFAULT_DATASET.to_string()
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

fn default_store_url() -> String {
    "${REDIS_URL}".to_string()
}
