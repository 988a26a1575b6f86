//! In-process store doubles for exercising the gateway and repositories without redis

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::db::{Connector, DocumentStore, StoreErr, StoreResult};

#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, Vec<Value>>>,
    seq: AtomicI64,
}

impl MemoryStore {
    pub fn documents(&self, key: &str) -> Vec<Value> {
        self.collections
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Seeds raw documents, bypassing id assignment
    pub fn seed(&self, key: &str, documents: impl IntoIterator<Item = Value>) {
        self.collections
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .extend(documents);
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn insert(&self, collection: &str, mut document: Value) -> StoreResult<i64> {
        let id = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        if let Value::Object(fields) = &mut document {
            fields.insert("_id".to_string(), Value::from(id));
        }

        self.collections
            .lock()
            .unwrap()
            .entry(collection.to_string())
            .or_default()
            .push(document);

        Ok(id)
    }

    async fn find_all(&self, collection: &str) -> StoreResult<Vec<Value>> {
        Ok(self.documents(collection))
    }
}

#[derive(Debug, Default)]
pub struct MemoryConnector {
    store: Arc<MemoryStore>,
    connects: Arc<AtomicUsize>,
}

impl MemoryConnector {
    pub fn store(&self) -> Arc<MemoryStore> {
        Arc::clone(&self.store)
    }

    pub fn connects(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.connects)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> StoreResult<Arc<dyn DocumentStore>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;

        Ok(Arc::clone(&self.store) as Arc<dyn DocumentStore>)
    }
}

#[derive(Debug, Default)]
pub struct FailingConnector {
    attempts: Arc<AtomicUsize>,
}

impl FailingConnector {
    pub fn attempts(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.attempts)
    }
}

#[async_trait]
impl Connector for FailingConnector {
    async fn connect(&self) -> StoreResult<Arc<dyn DocumentStore>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        Err(StoreErr::from(::redis::RedisError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        ))))
    }
}
