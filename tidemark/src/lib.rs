//! Tidemark core library.
//!
//! Ordered, resumable data migrations: a registry of numbered units, a
//! persisted watermark recording the highest applied unit, and a chunked batch
//! writer for moving records into a key-value store.

extern crate self as tidemark;

pub mod batch;
pub mod cancel;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod context;
pub mod errors;
pub mod keys;
pub mod registry;
pub mod runner;
pub mod store;
pub mod watermark;

pub use batch::BatchWriter;
pub use config::{BatchWriterConfig, RunnerConfig, TidemarkConfig};
pub use context::{MigrationContext, RunProgress};
pub use errors::*;
pub use registry::{MigrationFn, MigrationFuture, MigrationRegistration, MigrationRegistry, MigrationUnit, RegistryBuilder};
pub use runner::{MigrationRunner, MigrationStats, RunPhase};
pub use store::{BatchPutOutcome, MemoryStore, Record, RecordKey, RedisStore, Store};
pub use tidemark_macros::migration;
pub use tokio_util::sync::CancellationToken;
pub use watermark::{AppliedMigration, MigrationWatermark, WatermarkStore};

pub use redis;
pub use redis::aio::ConnectionManager;

// Re-export inventory for the #[migration] attribute
pub use inventory;
