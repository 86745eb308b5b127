//! Migration runner for executing pending migrations.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span};
use uuid::Uuid;

use crate::cancel::checkpoint;
use crate::config::{BatchWriterConfig, RunnerConfig};
use crate::context::{MigrationContext, RunProgress};
use crate::errors::MigrationError;
use crate::registry::{MigrationRegistry, MigrationUnit};
use crate::store::Store;
use crate::watermark::{MigrationWatermark, WatermarkStore};

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunPhase {
    Idle,
    Discovering,
    LoadingWatermark,
    Applying { sequence: u64 },
    PersistingWatermark { sequence: u64 },
    Done,
    Failed,
}

/// Statistics from a migration run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationStats {
    /// Number of migrations applied
    pub migrations_applied: u32,
    /// Migrations that were skipped (already applied)
    pub migrations_skipped: u32,
    /// Records reported as processed across all applied units
    pub records_migrated: u64,
    /// Total execution time in milliseconds
    pub total_time_ms: u64,
    /// Sequence numbers applied (or, in dry-run mode, that would be applied)
    pub applied: Vec<u64>,
    /// Watermark after the run
    pub watermark: MigrationWatermark,
    pub dry_run: bool,
}

/// Migration runner.
///
/// Applies the units of a [`MigrationRegistry`] above the persisted watermark,
/// strictly one after another, advancing the watermark after each success.
pub struct MigrationRunner {
    registry: MigrationRegistry,
    store: Arc<dyn Store>,
    watermarks: WatermarkStore,
    config: RunnerConfig,
    batch: BatchWriterConfig,
    dry_run: bool,
    phase: Mutex<RunPhase>,
}

impl MigrationRunner {
    pub fn new(registry: MigrationRegistry, store: Arc<dyn Store>, config: RunnerConfig) -> Result<Self, MigrationError> {
        config.validate()?;
        let watermarks = WatermarkStore::new(store.clone(), config.table.clone(), config.dataset.clone());
        Ok(Self {
            registry,
            store,
            watermarks,
            config,
            batch: BatchWriterConfig::default(),
            dry_run: false,
            phase: Mutex::new(RunPhase::Idle),
        })
    }

    /// Options for the batch writers handed to migration bodies.
    pub fn with_batch_config(mut self, batch: BatchWriterConfig) -> Result<Self, MigrationError> {
        batch.validate()?;
        self.batch = batch;
        Ok(self)
    }

    /// Enable dry-run mode (report pending units, apply nothing).
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    pub fn watermarks(&self) -> &WatermarkStore {
        &self.watermarks
    }

    /// Phase reached by the most recent run.
    pub fn phase(&self) -> RunPhase {
        self.phase.lock().map(|phase| *phase).unwrap_or(RunPhase::Failed)
    }

    fn enter(&self, phase: RunPhase) {
        debug!(?phase, "migration phase");
        if let Ok(mut current) = self.phase.lock() {
            *current = phase;
        }
    }

    /// Units in application order.
    pub fn discover(&self) -> &[MigrationUnit] {
        self.registry.units()
    }

    pub async fn current_watermark(&self, cancel: &CancellationToken) -> Result<MigrationWatermark, MigrationError> {
        self.watermarks.current(cancel).await
    }

    /// Units above `watermark`, ascending.
    pub fn pending(&self, watermark: &MigrationWatermark) -> Vec<&MigrationUnit> {
        self.registry.pending(watermark).collect()
    }

    /// Run one unit's body and advance the watermark past it.
    ///
    /// On failure the watermark is left untouched so a later run resumes at the
    /// same unit.
    pub async fn apply(
        &self,
        unit: &MigrationUnit,
        watermark: &MigrationWatermark,
        cancel: &CancellationToken,
    ) -> Result<MigrationWatermark, MigrationError> {
        let progress = Arc::new(RunProgress::new(self.config.log_every));
        self.apply_with_progress(unit, watermark, cancel, progress).await
    }

    async fn apply_with_progress(
        &self,
        unit: &MigrationUnit,
        watermark: &MigrationWatermark,
        cancel: &CancellationToken,
        progress: Arc<RunProgress>,
    ) -> Result<MigrationWatermark, MigrationError> {
        let sequence = unit.sequence();
        let name = unit.name();
        if let Some(current) = watermark.last_applied
            && sequence <= current
        {
            return Err(MigrationError::WatermarkRegression {
                current,
                attempted: sequence,
            });
        }
        checkpoint(cancel)?;

        self.enter(RunPhase::Applying { sequence });
        let before = progress.total();
        let ctx = MigrationContext::new(
            sequence,
            name,
            self.store.clone(),
            cancel.clone(),
            progress.clone(),
            self.batch.clone(),
        );

        match unit.invoke(ctx)?.await {
            Ok(()) => {}
            Err(MigrationError::Cancelled) => return Err(MigrationError::Cancelled),
            Err(source) => {
                return Err(MigrationError::UnitExecution {
                    sequence,
                    name: name.to_string(),
                    source: Box::new(source),
                });
            }
        }

        // A body that finished after the token fired may have stopped early.
        checkpoint(cancel)?;
        let total = progress.total();
        debug!(sequence, name, migrated = total - before, "{sequence}/{name}: migrated {total} item(s)");

        self.enter(RunPhase::PersistingWatermark { sequence });
        self.watermarks.advance(watermark, sequence, name, cancel).await
    }

    /// Apply every pending unit in order.
    ///
    /// Returns the run statistics; `records_migrated` is the total number of
    /// records reported by the applied units.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<MigrationStats, MigrationError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("migration_run", %run_id, dataset = %self.config.dataset, dry_run = self.dry_run);

        let result = self.run_inner(cancel).instrument(span.clone()).await;
        let _entered = span.enter();
        match &result {
            Ok(_) => self.enter(RunPhase::Done),
            Err(err) => {
                self.enter(RunPhase::Failed);
                if err.is_cancelled() {
                    info!("migration run cancelled");
                } else {
                    error!(error = %err, "migration run failed");
                }
            }
        }
        result
    }

    async fn run_inner(&self, cancel: &CancellationToken) -> Result<MigrationStats, MigrationError> {
        let start_time = Instant::now();
        let mut stats = MigrationStats {
            dry_run: self.dry_run,
            ..MigrationStats::default()
        };

        self.enter(RunPhase::Discovering);
        let units = self.discover();
        debug!(count = units.len(), "discovered migrations");

        self.enter(RunPhase::LoadingWatermark);
        let mut watermark = self.current_watermark(cancel).await?;
        debug!(watermark = %watermark, "loaded watermark");

        let pending = self.pending(&watermark);
        stats.migrations_skipped = (units.len() - pending.len()) as u32;
        for unit in units.iter().filter(|unit| watermark.is_applied(unit.sequence())) {
            debug!(sequence = unit.sequence(), name = unit.name(), "already applied, skipping");
        }
        for unit in &pending {
            debug!(sequence = unit.sequence(), name = unit.name(), "pending");
        }

        if self.dry_run {
            for unit in &pending {
                info!(sequence = unit.sequence(), name = unit.name(), "would apply");
            }
            stats.applied = pending.iter().map(|unit| unit.sequence()).collect();
            stats.watermark = watermark;
            stats.total_time_ms = start_time.elapsed().as_millis() as u64;
            return Ok(stats);
        }

        let progress = Arc::new(RunProgress::new(self.config.log_every));
        for unit in pending {
            checkpoint(cancel)?;
            let applied = self
                .apply_with_progress(unit, &watermark, cancel, progress.clone())
                .await
                .inspect_err(|err| {
                    if !err.is_cancelled() {
                        error!(sequence = unit.sequence(), name = unit.name(), error = %err, "migration failed");
                    }
                })?;
            watermark = applied;
            stats.migrations_applied += 1;
            stats.applied.push(unit.sequence());
        }

        stats.records_migrated = progress.total();
        if stats.records_migrated > 0 {
            debug!(total = stats.records_migrated, "total migrated {} item(s)", stats.records_migrated);
        }
        stats.watermark = watermark;
        stats.total_time_ms = start_time.elapsed().as_millis() as u64;
        Ok(stats)
    }
}

impl std::fmt::Debug for MigrationRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationRunner")
            .field("units", &self.registry.len())
            .field("watermarks", &self.watermarks)
            .field("dry_run", &self.dry_run)
            .finish()
    }
}
