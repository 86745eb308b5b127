//! Handle passed to migration bodies.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::batch::BatchWriter;
use crate::cancel;
use crate::config::BatchWriterConfig;
use crate::errors::MigrationError;
use crate::store::{Record, RecordKey, Store};

/// Whether a running count moving from `before` to `after` passed a multiple
/// of `every`. A single step can jump past several multiples at once.
pub(crate) fn crossed_log_boundary(before: u64, after: u64, every: u64) -> bool {
    let every = every.max(1);
    before / every != after / every
}

/// Run-wide record counter shared by every unit of a run.
#[derive(Debug)]
pub struct RunProgress {
    total: AtomicU64,
    log_every: u64,
}

impl RunProgress {
    pub fn new(log_every: u64) -> Self {
        Self {
            total: AtomicU64::new(0),
            log_every: log_every.max(1),
        }
    }

    /// Add `count` processed records on behalf of a unit and return the new run total.
    pub fn record(&self, sequence: u64, name: &str, count: u64) -> u64 {
        if count == 0 {
            return self.total();
        }
        let before = self.total.fetch_add(count, Ordering::Relaxed);
        let after = before + count;
        if crossed_log_boundary(before, after, self.log_every) {
            debug!(sequence, name, total = after, "{sequence}/{name}: migrated {after} item(s)");
        }
        after
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

/// Everything a migration body gets to work with.
///
/// Cloning is cheap; clones report into the same run progress and observe the
/// same cancellation token.
#[derive(Clone)]
pub struct MigrationContext {
    sequence: u64,
    name: Arc<str>,
    store: Arc<dyn Store>,
    cancel: CancellationToken,
    progress: Arc<RunProgress>,
    batch: BatchWriterConfig,
}

impl MigrationContext {
    pub fn new(
        sequence: u64,
        name: impl Into<Arc<str>>,
        store: Arc<dyn Store>,
        cancel: CancellationToken,
        progress: Arc<RunProgress>,
        batch: BatchWriterConfig,
    ) -> Self {
        Self {
            sequence,
            name: name.into(),
            store,
            cancel,
            progress,
            batch,
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Return [`MigrationError::Cancelled`] if the run was cancelled.
    pub fn checkpoint(&self) -> Result<(), MigrationError> {
        cancel::checkpoint(&self.cancel)
    }

    /// Read one record, abandoning the call if the run is cancelled.
    pub async fn get(&self, table: &str, key: &RecordKey) -> Result<Option<Record>, MigrationError> {
        cancel::cancellable(&self.cancel, self.store.get(table, key)).await
    }

    /// Read a whole partition, abandoning the call if the run is cancelled.
    pub async fn query(&self, table: &str, pk: &str) -> Result<Vec<Record>, MigrationError> {
        cancel::cancellable(&self.cancel, self.store.query(table, pk)).await
    }

    /// Report `count` more records processed by this unit.
    pub fn report_processed(&self, count: u64) {
        self.progress.record(self.sequence, &self.name, count);
    }

    /// Records processed so far across the whole run.
    pub fn total_processed(&self) -> u64 {
        self.progress.total()
    }

    /// A batch writer for `table` that shares this run's cancellation token and
    /// reports every persisted chunk as processed records.
    pub fn batch_writer(&self, table: impl Into<String>) -> BatchWriter {
        let progress = self.progress.clone();
        let sequence = self.sequence;
        let name = self.name.clone();
        let mut reported = 0u64;
        BatchWriter::new(self.store.clone(), table, self.batch.clone(), self.cancel.clone()).on_progress(
            move |written| {
                progress.record(sequence, &name, written - reported);
                reported = written;
            },
        )
    }
}

impl std::fmt::Debug for MigrationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationContext")
            .field("sequence", &self.sequence)
            .field("name", &self.name)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn context(progress: Arc<RunProgress>) -> MigrationContext {
        MigrationContext::new(
            4,
            "backfill",
            Arc::new(MemoryStore::new()),
            CancellationToken::new(),
            progress,
            BatchWriterConfig::default(),
        )
    }

    #[test]
    fn log_boundary_crossings() {
        assert!(crossed_log_boundary(199, 200, 200));
        assert!(crossed_log_boundary(190, 215, 200));
        assert!(!crossed_log_boundary(0, 25, 200));
        assert!(crossed_log_boundary(475, 500, 500));
        assert!(!crossed_log_boundary(200, 399, 200));
        assert!(!crossed_log_boundary(150, 150, 200));
        // 150 -> 450 passes both 200 and 400
        assert!(crossed_log_boundary(150, 450, 200));
        assert!(crossed_log_boundary(0, 1, 0));
    }

    #[test]
    fn progress_accumulates_across_units() {
        let progress = RunProgress::new(200);
        assert_eq!(progress.record(0, "a", 150), 150);
        assert_eq!(progress.record(1, "b", 100), 250);
        assert_eq!(progress.record(1, "b", 0), 250);
        assert_eq!(progress.total(), 250);
    }

    #[test]
    fn clones_report_into_same_progress() {
        let progress = Arc::new(RunProgress::new(200));
        let ctx = context(progress.clone());
        let other = ctx.clone();
        ctx.report_processed(3);
        other.report_processed(4);
        assert_eq!(progress.total(), 7);
        assert_eq!(ctx.total_processed(), 7);
    }

    #[test]
    fn checkpoint_follows_token() {
        let ctx = context(Arc::new(RunProgress::new(200)));
        assert!(ctx.checkpoint().is_ok());
        ctx.cancellation().cancel();
        assert!(ctx.is_cancelled());
        assert!(matches!(ctx.checkpoint(), Err(MigrationError::Cancelled)));
    }

    #[tokio::test]
    async fn reads_observe_cancellation() {
        let ctx = context(Arc::new(RunProgress::new(200)));
        assert!(ctx.query("audit", "item").await.unwrap().is_empty());
        assert!(ctx.get("audit", &RecordKey::new("item", "v")).await.unwrap().is_none());

        ctx.cancellation().cancel();
        assert!(matches!(ctx.query("audit", "item").await, Err(MigrationError::Cancelled)));
        assert!(matches!(
            ctx.get("audit", &RecordKey::new("item", "v")).await,
            Err(MigrationError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn batch_writer_reports_chunk_deltas() {
        let progress = Arc::new(RunProgress::new(200));
        let ctx = context(progress.clone());
        let mut writer = ctx.batch_writer("audit");

        let items = (0..30).map(|i| {
            let mut record = crate::store::Record::new();
            record.insert("pk".into(), format!("item#{i}").into());
            record.insert("sk".into(), "v".into());
            record
        });
        writer.write(items, false).await.unwrap();
        assert_eq!(progress.total(), 25);

        writer.flush().await.unwrap();
        assert_eq!(progress.total(), 30);
    }
}
