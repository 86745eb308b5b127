//! Chunked batch writes.
//!
//! [`BatchWriter`] accepts any number of records and persists them in
//! fixed-size chunks, one backend call per chunk, preserving insertion order.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::cancel::{cancellable, checkpoint};
use crate::config::BatchWriterConfig;
use crate::context::crossed_log_boundary;
use crate::errors::{MigrationError, UnprocessedItemsError};
use crate::store::{Record, RecordKey, Store};

type ProgressFn = Box<dyn FnMut(u64) + Send + Sync>;

pub struct BatchWriter {
    store: Arc<dyn Store>,
    table: String,
    config: BatchWriterConfig,
    cancel: CancellationToken,
    pending: VecDeque<Record>,
    written: u64,
    on_progress: Option<ProgressFn>,
}

impl BatchWriter {
    /// The chunk size is clamped to `1..=MAX_BATCH_ITEMS`; use
    /// [`BatchWriterConfig::validate`] to reject bad values up front instead.
    pub fn new(
        store: Arc<dyn Store>,
        table: impl Into<String>,
        mut config: BatchWriterConfig,
        cancel: CancellationToken,
    ) -> Self {
        config.chunk_size = config.chunk_size.clamp(1, crate::store::MAX_BATCH_ITEMS);
        config.log_every = config.log_every.max(1);
        Self {
            store,
            table: table.into(),
            config,
            cancel,
            pending: VecDeque::new(),
            written: 0,
            on_progress: None,
        }
    }

    /// Called with the running total after every chunk the backend accepted at
    /// least partly.
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: FnMut(u64) + Send + Sync + 'static,
    {
        self.on_progress = Some(Box::new(callback));
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn chunk_size(&self) -> usize {
        self.config.chunk_size
    }

    /// Records accepted by the backend so far.
    pub fn written_count(&self) -> u64 {
        self.written
    }

    /// Records buffered but not yet sent.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Append `items` and persist every full chunk. With `flush`, the remainder
    /// is persisted too, leaving nothing pending.
    pub async fn write<I>(&mut self, items: I, flush: bool) -> Result<(), MigrationError>
    where
        I: IntoIterator<Item = Record>,
    {
        self.pending.extend(items);

        while self.should_process(flush) {
            checkpoint(&self.cancel)?;
            let take = self.config.chunk_size.min(self.pending.len());
            let chunk: Vec<Record> = self.pending.drain(..take).collect();
            self.persist(chunk).await?;
        }

        if flush && self.written > 0 {
            debug!(table = %self.table, written = self.written, "written {} to {}", self.written, self.table);
        }
        Ok(())
    }

    /// Persist everything still pending.
    pub async fn flush(&mut self) -> Result<(), MigrationError> {
        self.write(std::iter::empty(), true).await
    }

    fn should_process(&self, flush: bool) -> bool {
        self.pending.len() >= self.config.chunk_size || (flush && !self.pending.is_empty())
    }

    async fn persist(&mut self, chunk: Vec<Record>) -> Result<(), MigrationError> {
        let outcome = match cancellable(&self.cancel, self.store.batch_put(&self.table, &chunk)).await {
            Ok(outcome) => outcome,
            Err(err) => {
                if !err.is_cancelled() {
                    error!(table = %self.table, keys = ?chunk_keys(&chunk), error = %err, "batch write failed");
                }
                return Err(err);
            }
        };

        let accepted = chunk.len().saturating_sub(outcome.unprocessed.len()) as u64;
        let before = self.written;
        self.written += accepted;

        if crossed_log_boundary(before, self.written, self.config.log_every) {
            debug!(table = %self.table, written = self.written, "written {} to {}", self.written, self.table);
        }
        // Accepted records of a partially rejected chunk still count as progress.
        if accepted > 0
            && let Some(callback) = self.on_progress.as_mut()
        {
            callback(self.written);
        }

        if !outcome.is_complete() {
            error!(
                table = %self.table,
                keys = ?chunk_keys(&chunk),
                unprocessed = outcome.unprocessed.len(),
                "batch write left unprocessed items"
            );
            return Err(UnprocessedItemsError {
                table: self.table.clone(),
                items: outcome.unprocessed,
            }
            .into());
        }
        Ok(())
    }
}

fn chunk_keys(chunk: &[Record]) -> Vec<String> {
    chunk
        .iter()
        .map(|record| RecordKey::of(record).map_or_else(|_| "<missing key>".to_string(), |key| key.to_string()))
        .collect()
}

impl std::fmt::Debug for BatchWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchWriter")
            .field("table", &self.table)
            .field("chunk_size", &self.config.chunk_size)
            .field("pending", &self.pending.len())
            .field("written", &self.written)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::Mutex;

    fn items(range: std::ops::Range<usize>) -> Vec<Record> {
        range
            .map(|i| {
                let mut record = Record::new();
                record.insert("pk".into(), format!("item#{i:03}").into());
                record.insert("sk".into(), "v1".into());
                record
            })
            .collect()
    }

    fn writer(store: &MemoryStore) -> BatchWriter {
        BatchWriter::new(
            Arc::new(store.clone()),
            "audit",
            BatchWriterConfig::default(),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn below_chunk_size_stays_pending() {
        let store = MemoryStore::new();
        let mut writer = writer(&store);
        writer.write(items(0..24), false).await.unwrap();
        assert_eq!(writer.pending_len(), 24);
        assert_eq!(writer.written_count(), 0);
        assert!(store.is_empty("audit"));
    }

    #[tokio::test]
    async fn progress_fires_once_per_chunk_with_running_total() {
        let store = MemoryStore::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut writer = writer(&store).on_progress(move |total| sink.lock().unwrap().push(total));

        writer.write(items(0..60), true).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![25, 50, 60]);
        assert_eq!(store.len("audit"), 60);
    }

    #[tokio::test]
    async fn flush_on_empty_writer_is_a_no_op() {
        let store = MemoryStore::new();
        let mut writer = writer(&store);
        writer.flush().await.unwrap();
        assert_eq!(writer.written_count(), 0);
    }

    #[tokio::test]
    async fn cancelled_writer_keeps_items_pending() {
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        let mut writer = BatchWriter::new(
            Arc::new(store.clone()),
            "audit",
            BatchWriterConfig::default(),
            cancel.clone(),
        );
        cancel.cancel();

        let err = writer.write(items(0..30), false).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(writer.pending_len(), 30);
        assert!(store.is_empty("audit"));
    }

    #[test]
    fn chunk_size_is_clamped_to_backend_limit() {
        let writer = BatchWriter::new(
            Arc::new(MemoryStore::new()),
            "audit",
            BatchWriterConfig::default().with_chunk_size(100),
            CancellationToken::new(),
        );
        assert_eq!(writer.chunk_size(), 25);
    }
}
