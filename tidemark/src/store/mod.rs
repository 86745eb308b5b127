//! Key-value persistence seam.
//!
//! The runner and batch writer only ever talk to a [`Store`]. Records are JSON
//! objects addressed by a partition key (`pk`) and a sort key (`sk`) carried
//! inside the record itself.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::StoreError;

pub use memory::MemoryStore;
pub use self::redis::RedisStore;

/// Largest number of items a single `batch_put` call may carry.
pub const MAX_BATCH_ITEMS: usize = 25;

/// Attribute holding the partition key.
pub const PARTITION_KEY: &str = "pk";
/// Attribute holding the sort key.
pub const SORT_KEY: &str = "sk";

/// A stored item.
pub type Record = serde_json::Map<String, Value>;

/// Primary key of a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub pk: String,
    pub sk: String,
}

impl RecordKey {
    pub fn new(pk: impl Into<String>, sk: impl Into<String>) -> Self {
        Self {
            pk: pk.into(),
            sk: sk.into(),
        }
    }

    /// Extract the key attributes from a record.
    pub fn of(record: &Record) -> Result<Self, StoreError> {
        let pk = string_attribute(record, PARTITION_KEY)?;
        let sk = string_attribute(record, SORT_KEY)?;
        Ok(Self::new(pk, sk))
    }
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.pk, self.sk)
    }
}

fn string_attribute(record: &Record, attribute: &'static str) -> Result<String, StoreError> {
    match record.get(attribute) {
        Some(Value::String(value)) => Ok(value.clone()),
        Some(Value::Number(value)) => Ok(value.to_string()),
        _ => Err(StoreError::MissingKey { attribute }),
    }
}

/// Result of a batch write. Backends may accept part of a batch and hand the
/// rest back instead of failing the whole call.
#[derive(Debug, Default)]
pub struct BatchPutOutcome {
    pub unprocessed: Vec<Record>,
}

impl BatchPutOutcome {
    pub fn is_complete(&self) -> bool {
        self.unprocessed.is_empty()
    }
}

/// Storage backend used for watermark rows and batched record writes.
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch a single record, or `None` when absent.
    async fn get(&self, table: &str, key: &RecordKey) -> Result<Option<Record>, StoreError>;

    /// Insert or replace a record. The key is read from the record itself.
    async fn put(&self, table: &str, record: Record) -> Result<(), StoreError>;

    /// Persist up to [`MAX_BATCH_ITEMS`] records in one call.
    async fn batch_put(&self, table: &str, items: &[Record]) -> Result<BatchPutOutcome, StoreError>;

    /// All records of a partition, ordered by sort key.
    async fn query(&self, table: &str, pk: &str) -> Result<Vec<Record>, StoreError>;
}

pub(crate) fn ensure_batch_size(items: &[Record]) -> Result<(), StoreError> {
    if items.len() > MAX_BATCH_ITEMS {
        return Err(StoreError::BatchTooLarge {
            size: items.len(),
            limit: MAX_BATCH_ITEMS,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn extracts_key_from_record() {
        let key = RecordKey::of(&record(json!({"pk": "user#1", "sk": "profile", "name": "a"}))).unwrap();
        assert_eq!(key, RecordKey::new("user#1", "profile"));
        assert_eq!(key.to_string(), "user#1/profile");
    }

    #[test]
    fn numeric_key_attributes_are_accepted() {
        let key = RecordKey::of(&record(json!({"pk": 7, "sk": "x"}))).unwrap();
        assert_eq!(key.pk, "7");
    }

    #[test]
    fn missing_sort_key_is_reported() {
        let err = RecordKey::of(&record(json!({"pk": "a"}))).unwrap_err();
        assert!(matches!(err, StoreError::MissingKey { attribute: "sk" }));
    }

    #[test]
    fn oversized_batches_are_rejected() {
        let items = vec![Record::new(); MAX_BATCH_ITEMS + 1];
        assert!(matches!(
            ensure_batch_size(&items),
            Err(StoreError::BatchTooLarge { size: 26, limit: 25 })
        ));
        assert!(ensure_batch_size(&items[..MAX_BATCH_ITEMS]).is_ok());
    }
}
