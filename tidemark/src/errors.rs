use std::borrow::Cow;
use std::path::PathBuf;

use thiserror::Error;

use crate::store::Record;

/// Top-level error type returned by the runner, the batch writer and migration bodies.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The registry is malformed; nothing was applied.
    #[error("migration discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    /// A migration body failed. The watermark was left where it was.
    #[error("migration {sequence} ({name}) failed: {source}")]
    UnitExecution {
        sequence: u64,
        name: String,
        #[source]
        source: Box<MigrationError>,
    },

    /// The backend accepted only part of a batch.
    #[error(transparent)]
    UnprocessedItems(#[from] UnprocessedItemsError),

    /// The shared cancellation token fired.
    #[error("migration run cancelled")]
    Cancelled,

    /// Underlying store call failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A unit body was invoked a second time in the same registry.
    #[error("migration {sequence} was already invoked by this registry")]
    AlreadyInvoked { sequence: u64 },

    /// Attempted to move the watermark backwards or re-apply an applied unit.
    #[error("watermark is at {current}, refusing to record {attempted}")]
    WatermarkRegression { current: u64, attempted: u64 },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Free-form failure raised from inside a migration body.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MigrationError {
    pub fn is_cancelled(&self) -> bool {
        match self {
            MigrationError::Cancelled => true,
            MigrationError::UnitExecution { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

/// Registry problems detected before any unit runs.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("sequence number {sequence} is registered twice ({first} and {second})")]
    DuplicateSequence {
        sequence: u64,
        first: String,
        second: String,
    },

    #[error("no migration is registered for sequence number {sequence}")]
    Unresolved { sequence: u64 },

    #[error("migration {sequence} has an empty name")]
    InvalidName { sequence: u64 },
}

/// Items a batch call did not persist. Carries exactly the rejected records.
#[derive(Debug, Error)]
#[error("{} item(s) were not processed by table '{table}'", .items.len())]
pub struct UnprocessedItemsError {
    pub table: String,
    pub items: Vec<Record>,
}

/// Failures raised by a [`Store`](crate::store::Store) implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("record is missing key attribute `{attribute}`")]
    MissingKey { attribute: &'static str },

    #[error("failed to encode or decode record: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("batch of {size} items exceeds the backend limit of {limit}")]
    BatchTooLarge { size: usize, limit: usize },

    #[error("{message}")]
    Backend { message: Cow<'static, str> },
}

/// Invalid or unreadable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("environment variable {var} not set")]
    MissingEnv { var: String },

    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

impl ConfigError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid { message: message.into() }
    }
}
