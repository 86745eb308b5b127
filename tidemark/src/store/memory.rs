//! In-process store for tests and local dry runs.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::{BatchPutOutcome, Record, RecordKey, Store, ensure_batch_size};
use crate::errors::StoreError;

type Tables = BTreeMap<String, BTreeMap<RecordKey, Record>>;

/// Store keeping every table in a shared ordered map.
///
/// Clones share the same data, so a test can hand one clone to the runner and
/// inspect the other.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records stored in a table.
    pub fn len(&self, table: &str) -> usize {
        self.tables
            .read()
            .map(|tables| tables.get(table).map_or(0, BTreeMap::len))
            .unwrap_or(0)
    }

    pub fn is_empty(&self, table: &str) -> bool {
        self.len(table) == 0
    }

    /// Snapshot of a table in key order.
    pub fn records(&self, table: &str) -> Vec<Record> {
        self.tables
            .read()
            .map(|tables| {
                tables
                    .get(table)
                    .map(|rows| rows.values().cloned().collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }
}

fn poisoned() -> StoreError {
    StoreError::Backend {
        message: Cow::Borrowed("memory store lock poisoned"),
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, table: &str, key: &RecordKey) -> Result<Option<Record>, StoreError> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(tables.get(table).and_then(|rows| rows.get(key)).cloned())
    }

    async fn put(&self, table: &str, record: Record) -> Result<(), StoreError> {
        let key = RecordKey::of(&record)?;
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        tables.entry(table.to_string()).or_default().insert(key, record);
        Ok(())
    }

    async fn batch_put(&self, table: &str, items: &[Record]) -> Result<BatchPutOutcome, StoreError> {
        ensure_batch_size(items)?;
        // Resolve every key first so a malformed item leaves the table untouched.
        let keyed = items
            .iter()
            .map(|item| RecordKey::of(item).map(|key| (key, item.clone())))
            .collect::<Result<Vec<_>, _>>()?;

        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        tables.entry(table.to_string()).or_default().extend(keyed);
        Ok(BatchPutOutcome::default())
    }

    async fn query(&self, table: &str, pk: &str) -> Result<Vec<Record>, StoreError> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|(key, _)| key.pk == pk)
                    .map(|(_, record)| record.clone())
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn item(pk: &str, sk: &str) -> Record {
        json!({"pk": pk, "sk": sk}).as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = MemoryStore::new();
        let mut record = item("a", "1");
        record.insert("value".to_string(), Value::from(10));
        store.put("t", record.clone()).await.unwrap();

        let fetched = store.get("t", &RecordKey::new("a", "1")).await.unwrap();
        assert_eq!(fetched, Some(record));
        assert!(store.get("t", &RecordKey::new("a", "2")).await.unwrap().is_none());
        assert!(store.get("other", &RecordKey::new("a", "1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn batch_with_missing_key_writes_nothing() {
        let store = MemoryStore::new();
        let mut bad = Record::new();
        bad.insert("pk".to_string(), Value::from("x"));

        let err = store.batch_put("t", &[item("a", "1"), bad]).await.unwrap_err();
        assert!(matches!(err, StoreError::MissingKey { .. }));
        assert!(store.is_empty("t"));
    }

    #[tokio::test]
    async fn query_returns_partition_in_sort_key_order() {
        let store = MemoryStore::new();
        store
            .batch_put("t", &[item("p", "b"), item("q", "a"), item("p", "a")])
            .await
            .unwrap();

        let rows = store.query("t", "p").await.unwrap();
        let sort_keys: Vec<_> = rows.iter().map(|r| r["sk"].as_str().unwrap()).collect();
        assert_eq!(sort_keys, vec!["a", "b"]);
        assert_eq!(store.len("t"), 3);
    }

    #[tokio::test]
    async fn clones_share_data() {
        let store = MemoryStore::new();
        let view = store.clone();
        store.put("t", item("a", "1")).await.unwrap();
        assert_eq!(view.records("t").len(), 1);
    }
}
