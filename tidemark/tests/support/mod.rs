#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tidemark::errors::StoreError;
use tidemark::{BatchPutOutcome, MemoryStore, Record, RecordKey, Store};

/// In-memory store that records batch calls and can be told to misbehave.
#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryStore,
    rejected: Mutex<HashSet<String>>,
    batches: Mutex<Vec<Vec<String>>>,
    fail_puts: AtomicBool,
    gets: AtomicUsize,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand back records with this sort key as unprocessed instead of storing them.
    pub fn reject(&self, sk: &str) {
        self.rejected.lock().unwrap().insert(sk.to_string());
    }

    /// Make every single-record `put` fail.
    pub fn fail_puts(&self) {
        self.fail_puts.store(true, Ordering::SeqCst);
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().unwrap().iter().map(Vec::len).collect()
    }

    /// Sort keys of every `batch_put` call, in the order they were sent.
    pub fn batches(&self) -> Vec<Vec<String>> {
        self.batches.lock().unwrap().clone()
    }

    /// Number of single-record reads issued so far.
    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn records(&self, table: &str) -> Vec<Record> {
        self.inner.records(table)
    }

    pub fn len(&self, table: &str) -> usize {
        self.inner.len(table)
    }
}

#[async_trait]
impl Store for RecordingStore {
    async fn get(&self, table: &str, key: &RecordKey) -> Result<Option<Record>, StoreError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(table, key).await
    }

    async fn put(&self, table: &str, record: Record) -> Result<(), StoreError> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StoreError::Backend {
                message: "put rejected by test store".into(),
            });
        }
        self.inner.put(table, record).await
    }

    async fn batch_put(&self, table: &str, items: &[Record]) -> Result<BatchPutOutcome, StoreError> {
        let sort_keys: Vec<String> = items
            .iter()
            .map(|item| item.get("sk").and_then(|sk| sk.as_str()).unwrap_or_default().to_string())
            .collect();
        self.batches.lock().unwrap().push(sort_keys);

        let rejected = self.rejected.lock().unwrap().clone();
        let (unprocessed, accepted): (Vec<Record>, Vec<Record>) = items
            .iter()
            .cloned()
            .partition(|item| item.get("sk").and_then(|sk| sk.as_str()).is_some_and(|sk| rejected.contains(sk)));

        self.inner.batch_put(table, &accepted).await?;
        Ok(BatchPutOutcome { unprocessed })
    }

    async fn query(&self, table: &str, pk: &str) -> Result<Vec<Record>, StoreError> {
        self.inner.query(table, pk).await
    }
}

/// A record keyed `item` / `<sk>`.
pub fn item(sk: impl Into<String>) -> Record {
    let mut record = Record::new();
    record.insert("pk".into(), "item".into());
    record.insert("sk".into(), serde_json::Value::String(sk.into()));
    record
}

pub fn items(count: usize) -> Vec<Record> {
    (0..count).map(|i| item(format!("{i:04}"))).collect()
}
