//! Redis-backed document store.
//!
//! Each collection is a list of JSON documents under `{database}:{collection}`, appended in
//! insertion order. Identifiers come from a per-collection counter at `{key}:seq` and are written
//! into the stored document as `_id`.

use core::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use serde_json::Value;
use tracing::instrument;

use crate::db::{Connector, DocumentStore, StoreResult};

fn sequence_key(collection: &str) -> String {
    format!("{collection}:seq")
}

/// Writes the assigned id into the document and encodes it for storage. Non-object documents are
/// stored as given.
fn stamp(mut document: Value, id: i64) -> serde_json::Result<String> {
    if let Value::Object(fields) = &mut document {
        fields.insert("_id".to_string(), Value::from(id));
    }

    serde_json::to_string(&document)
}

/// Decodes stored entries, skipping any that aren't valid JSON so one corrupt entry doesn't make
/// the whole collection unreadable
fn decode_entries(raw: &[String]) -> Vec<Value> {
    raw.iter()
        .filter_map(|entry| match serde_json::from_str::<Value>(entry) {
            Ok(doc) => Some(doc),
            Err(e) => {
                tracing::warn!(error = ?e, "skipping undecodable document");
                None
            }
        })
        .collect()
}

#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl DocumentStore for RedisStore {
    #[instrument(skip(self, document))]
    async fn insert(&self, collection: &str, document: Value) -> StoreResult<i64> {
        let mut conn = self.manager.clone();

        let id: i64 = redis::cmd("INCR")
            .arg(sequence_key(collection))
            .query_async(&mut conn)
            .await?;

        let encoded = stamp(document, id)?;
        let length: i64 = redis::cmd("RPUSH")
            .arg(collection)
            .arg(encoded)
            .query_async(&mut conn)
            .await?;

        tracing::debug!(id, length, "document appended");
        Ok(id)
    }

    #[instrument(skip(self))]
    async fn find_all(&self, collection: &str) -> StoreResult<Vec<Value>> {
        let mut conn = self.manager.clone();

        let raw: Vec<String> = redis::cmd("LRANGE")
            .arg(collection)
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await?;

        Ok(decode_entries(&raw))
    }
}

pub struct RedisConnector {
    url: String,
}

impl RedisConnector {
    pub fn new(url: String) -> Self {
        Self { url }
    }
}

// the url may carry credentials
impl fmt::Debug for RedisConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisConnector").finish_non_exhaustive()
    }
}

#[async_trait]
impl Connector for RedisConnector {
    #[instrument(skip(self))]
    async fn connect(&self) -> StoreResult<Arc<dyn DocumentStore>> {
        tracing::debug!("connecting to redis document store");

        let client = redis::Client::open(self.url.as_str())?;
        let manager = ConnectionManager::new(client).await?;

        tracing::info!("connected to redis document store");
        Ok(Arc::new(RedisStore { manager }))
    }
}
