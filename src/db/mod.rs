use core::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::instrument;

use crate::db::redis::RedisConnector;
use crate::util::env::Config;

pub mod models;
pub mod redis;
pub mod repositories;

#[cfg(test)]
pub mod memory;

pub mod prelude {
    pub use crate::db::models::feedback::{FeedbackDraft, FeedbackInput, FeedbackRecord};
    pub use crate::db::models::usage::{DailyCount, UsageRecord};
    pub use crate::db::repositories::feedback::{
        Backing, FeedbackError, FeedbackFallback, FeedbackRepository,
    };
    pub use crate::db::repositories::usage::{UsageError, UsageRepository};
    pub use crate::db::{CollectionName, StorageGateway, StoreErr};
}

/// Logical collections the service reads and writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionName {
    Feedbacks,
    UsageGameMath,
    UsageGamePicture,
    UsageGameThai,
    UsageGameMatch,
}

impl CollectionName {
    pub const fn as_str(&self) -> &'static str {
        match self {
            CollectionName::Feedbacks => "feedbacks",
            CollectionName::UsageGameMath => "usage_gamemath_html",
            CollectionName::UsageGamePicture => "usage_gamepicture_html",
            CollectionName::UsageGameThai => "usage_gamethai_html",
            CollectionName::UsageGameMatch => "usage_gamematch_html",
        }
    }
}

impl fmt::Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only document storage addressed by collection key
#[async_trait]
pub trait DocumentStore: Send + Sync + fmt::Debug {
    /// Stores `document`, returning the identifier the store assigned to it
    async fn insert(&self, collection: &str, document: Value) -> StoreResult<i64>;

    /// Every document in `collection`, oldest first
    async fn find_all(&self, collection: &str) -> StoreResult<Vec<Value>>;
}

/// Opens the underlying store connection; called at most once per successful connection
#[async_trait]
pub trait Connector: Send + Sync + fmt::Debug {
    async fn connect(&self) -> StoreResult<Arc<dyn DocumentStore>>;
}

/// Resolves named collections against the configured document store.
///
/// The connection is opened lazily by the first caller and reused for the lifetime of the
/// process. Concurrent first calls wait on the same initialisation, so at most one connection
/// is opened. A failed attempt is logged and reported as `None`; it is not cached, so a later
/// call will try again.
#[derive(Debug)]
pub struct StorageGateway {
    database: String,
    connector: Option<Box<dyn Connector>>,
    store: OnceCell<Arc<dyn DocumentStore>>,
}

impl StorageGateway {
    pub fn from_config(config: &Config) -> Self {
        let database = config.store_database.clone();

        match config.redis_url.clone() {
            Some(url) => Self::with_connector(database, RedisConnector::new(url)),
            None => Self::unconfigured(database),
        }
    }

    pub fn with_connector(database: impl Into<String>, connector: impl Connector + 'static) -> Self {
        Self {
            database: database.into(),
            connector: Some(Box::new(connector)),
            store: OnceCell::new(),
        }
    }

    /// A gateway with no store configured; every lookup falls back
    pub fn unconfigured(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            connector: None,
            store: OnceCell::new(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.connector.is_some()
    }

    #[instrument(skip(self))]
    pub async fn collection(&self, name: CollectionName) -> Option<Collection> {
        let connector = self.connector.as_ref()?;

        match self.store.get_or_try_init(|| connector.connect()).await {
            Ok(store) => Some(Collection {
                name,
                key: format!("{}:{}", self.database, name),
                store: Arc::clone(store),
            }),
            Err(e) => {
                tracing::error!(error = ?e, collection = %name, "document store connection failed");
                None
            }
        }
    }
}

/// Handle to one collection of a connected store
#[derive(Debug, Clone)]
pub struct Collection {
    name: CollectionName,
    key: String,
    store: Arc<dyn DocumentStore>,
}

impl Collection {
    #[instrument(skip(self, document), fields(collection = %self.name))]
    pub async fn insert_one(&self, document: Value) -> StoreResult<i64> {
        self.store.insert(&self.key, document).await
    }

    #[instrument(skip(self), fields(collection = %self.name))]
    pub async fn find_all(&self) -> StoreResult<Vec<Value>> {
        let documents = self.store.find_all(&self.key).await?;
        tracing::debug!(count = documents.len(), "fetched documents");

        Ok(documents)
    }
}

pub type StoreResult<T> = core::result::Result<T, StoreErr>;

#[derive(Debug, Error)]
pub enum StoreErr {
    #[error(transparent)]
    RedisClientError(#[from] ::redis::RedisError),

    #[error(transparent)]
    SerdeError(#[from] serde_json::Error),
}
