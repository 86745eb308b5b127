//! Persisted migration watermark.
//!
//! Two kinds of rows live in the watermark table under the dataset partition:
//! one mutable "current" row holding the highest applied sequence number, and
//! one append-only history row per successful application.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cancel::cancellable;
use crate::errors::{MigrationError, StoreError};
use crate::keys::{CURRENT_SORT_KEY, HISTORY_SORT_KEY_PREFIX, history_sort_key};
use crate::store::{Record, RecordKey, Store};

const CURRENT_ROW_TYPE: &str = "migration";
const HISTORY_ROW_TYPE: &str = "migrationRun";

/// Highest applied migration of a dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationWatermark {
    /// `None` until the first unit has been applied.
    pub last_applied: Option<u64>,
    pub name: Option<String>,
    pub applied_at: Option<DateTime<Utc>>,
}

impl MigrationWatermark {
    /// The "nothing applied yet" sentinel.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_applied(&self, sequence: u64) -> bool {
        self.last_applied.is_some_and(|last| sequence <= last)
    }

    fn from_record(record: &Record) -> Self {
        Self {
            last_applied: record.get("number").and_then(Value::as_u64),
            name: record.get("name").and_then(Value::as_str).map(str::to_string),
            applied_at: record.get("date").and_then(Value::as_i64).and_then(DateTime::<Utc>::from_timestamp_millis),
        }
    }
}

impl std::fmt::Display for MigrationWatermark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.last_applied, &self.name) {
            (Some(number), Some(name)) => write!(f, "{number}/{name}"),
            (Some(number), None) => write!(f, "{number}"),
            (None, _) => f.write_str("none applied"),
        }
    }
}

/// One history row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedMigration {
    pub sequence: u64,
    pub name: String,
    pub applied_at: DateTime<Utc>,
    /// Sort key of the history row.
    pub run_key: String,
}

impl AppliedMigration {
    fn from_record(record: &Record) -> Option<Self> {
        Some(Self {
            sequence: record.get("number").and_then(Value::as_u64)?,
            name: record.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
            applied_at: record
                .get("date")
                .and_then(Value::as_i64)
                .and_then(DateTime::<Utc>::from_timestamp_millis)?,
            run_key: record.get("sk").and_then(Value::as_str)?.to_string(),
        })
    }
}

/// Reads and advances the watermark of one dataset.
#[derive(Clone)]
pub struct WatermarkStore {
    store: Arc<dyn Store>,
    table: String,
    dataset: String,
}

impl WatermarkStore {
    pub fn new(store: Arc<dyn Store>, table: impl Into<String>, dataset: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
            dataset: dataset.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    fn current_key(&self) -> RecordKey {
        RecordKey::new(&self.dataset, CURRENT_SORT_KEY)
    }

    /// The persisted watermark, or [`MigrationWatermark::none`] when no row exists.
    pub async fn current(&self, cancel: &CancellationToken) -> Result<MigrationWatermark, MigrationError> {
        let row = cancellable(cancel, self.store.get(&self.table, &self.current_key())).await?;
        Ok(row.as_ref().map(MigrationWatermark::from_record).unwrap_or_default())
    }

    /// Record `sequence` as applied on top of `previous`: overwrite the current
    /// row and append a history row, both written concurrently.
    ///
    /// `previous` is the watermark the caller already holds; it is not re-read.
    /// Refuses to move the watermark backwards or to record the same sequence
    /// twice.
    pub async fn advance(
        &self,
        previous: &MigrationWatermark,
        sequence: u64,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<MigrationWatermark, MigrationError> {
        if let Some(last) = previous.last_applied
            && sequence <= last
        {
            return Err(MigrationError::WatermarkRegression {
                current: last,
                attempted: sequence,
            });
        }

        let applied_at = Utc::now();
        let millis = applied_at.timestamp_millis();
        let current_row = self.row(CURRENT_SORT_KEY.to_string(), CURRENT_ROW_TYPE, sequence, name, millis);
        let history_row = self.row(
            history_sort_key(millis.max(0) as u64, sequence),
            HISTORY_ROW_TYPE,
            sequence,
            name,
            millis,
        );

        let (current_put, history_put) = (
            self.store.put(&self.table, current_row),
            self.store.put(&self.table, history_row),
        );
        cancellable(cancel, async {
            tokio::try_join!(current_put, history_put)?;
            Ok::<_, StoreError>(())
        })
        .await?;

        debug!(dataset = %self.dataset, sequence, name, "watermark advanced");
        Ok(MigrationWatermark {
            last_applied: Some(sequence),
            name: Some(name.to_string()),
            applied_at: Some(applied_at),
        })
    }

    /// Every history row of the dataset, oldest first.
    pub async fn history(&self, cancel: &CancellationToken) -> Result<Vec<AppliedMigration>, MigrationError> {
        let rows = cancellable(cancel, self.store.query(&self.table, &self.dataset)).await?;
        Ok(rows
            .iter()
            .filter(|row| {
                row.get("sk")
                    .and_then(Value::as_str)
                    .is_some_and(|sk| sk.starts_with(HISTORY_SORT_KEY_PREFIX))
            })
            .filter_map(AppliedMigration::from_record)
            .collect())
    }

    fn row(&self, sk: String, kind: &str, sequence: u64, name: &str, millis: i64) -> Record {
        let mut record = Record::new();
        record.insert("pk".into(), Value::from(self.dataset.as_str()));
        record.insert("sk".into(), Value::from(sk));
        record.insert("type".into(), Value::from(kind));
        record.insert("date".into(), Value::from(millis));
        record.insert("number".into(), Value::from(sequence));
        record.insert("name".into(), Value::from(name));
        record
    }
}

impl std::fmt::Debug for WatermarkStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatermarkStore")
            .field("table", &self.table)
            .field("dataset", &self.dataset)
            .finish()
    }
}
