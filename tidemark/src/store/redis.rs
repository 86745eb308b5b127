//! Redis-backed store.
//!
//! Each partition lives in one hash at `<prefix>:<table>:<pk>`; hash fields are
//! sort keys and values are the JSON-encoded records.

use std::collections::HashMap;

use ::redis::AsyncCommands;
use ::redis::aio::ConnectionManager;
use async_trait::async_trait;

use super::{BatchPutOutcome, Record, RecordKey, Store, ensure_batch_size};
use crate::errors::StoreError;
use crate::keys::KeyContext;

pub struct RedisStore {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisStore {
    pub fn new(conn: ConnectionManager, prefix: impl Into<String>) -> Self {
        Self {
            conn,
            prefix: prefix.into(),
        }
    }

    /// Open a managed connection to `redis_url`.
    pub async fn connect(redis_url: &str, prefix: impl Into<String>) -> Result<Self, StoreError> {
        let client = ::redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::new(conn, prefix))
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn partition_key(&self, table: &str, pk: &str) -> String {
        KeyContext::new(&self.prefix).partition(table, pk)
    }
}

fn decode(raw: &str) -> Result<Record, StoreError> {
    Ok(serde_json::from_str(raw)?)
}

#[async_trait]
impl Store for RedisStore {
    async fn get(&self, table: &str, key: &RecordKey) -> Result<Option<Record>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.hget(self.partition_key(table, &key.pk), &key.sk).await?;
        raw.as_deref().map(decode).transpose()
    }

    async fn put(&self, table: &str, record: Record) -> Result<(), StoreError> {
        let key = RecordKey::of(&record)?;
        let json = serde_json::to_string(&record)?;
        let mut conn = self.conn.clone();
        let _: () = conn.hset(self.partition_key(table, &key.pk), &key.sk, json).await?;
        Ok(())
    }

    async fn batch_put(&self, table: &str, items: &[Record]) -> Result<BatchPutOutcome, StoreError> {
        ensure_batch_size(items)?;
        if items.is_empty() {
            return Ok(BatchPutOutcome::default());
        }

        // MULTI/EXEC: the chunk either lands completely or not at all, so there
        // is never an unprocessed remainder to hand back.
        let mut pipe = ::redis::pipe();
        pipe.atomic();
        for item in items {
            let key = RecordKey::of(item)?;
            let json = serde_json::to_string(item)?;
            pipe.hset(self.partition_key(table, &key.pk), key.sk, json).ignore();
        }

        let mut conn = self.conn.clone();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(BatchPutOutcome::default())
    }

    async fn query(&self, table: &str, pk: &str) -> Result<Vec<Record>, StoreError> {
        let mut conn = self.conn.clone();
        let rows: HashMap<String, String> = conn.hgetall(self.partition_key(table, pk)).await?;

        let mut sorted: Vec<(String, String)> = rows.into_iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));
        sorted.into_iter().map(|(_, raw)| decode(&raw)).collect()
    }
}
