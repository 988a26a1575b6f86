use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::instrument;

use crate::constants::MSG_FEEDBACK_REQUIRED;
use crate::db::prelude::{FeedbackDraft, FeedbackInput, FeedbackRecord};
use crate::db::{CollectionName, StorageGateway, StoreErr};
use crate::util::dates::parse_loose;

/// Where a record ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backing {
    Store,
    Fallback,
}

#[derive(Debug, Clone)]
pub struct FeedbackSubmission {
    pub record: FeedbackRecord,
    pub backing: Backing,
}

/// Process-local feedback list used while no document store is available
#[derive(Debug, Default)]
pub struct FeedbackFallback {
    inner: Mutex<FallbackList>,
}

#[derive(Debug, Default)]
struct FallbackList {
    items: Vec<FeedbackRecord>,
    last_id: i64,
}

impl FeedbackFallback {
    /// Ids are epoch milliseconds, bumped past the previous id when two submissions land in the
    /// same millisecond
    pub async fn push(&self, draft: FeedbackDraft, now: DateTime<Utc>) -> FeedbackRecord {
        let mut list = self.inner.lock().await;

        let id = now.timestamp_millis().max(list.last_id + 1);
        list.last_id = id;

        let record = draft.into_record(id);
        list.items.push(record.clone());
        record
    }

    /// Insertion order, oldest first
    pub async fn snapshot(&self) -> Vec<FeedbackRecord> {
        self.inner.lock().await.items.clone()
    }
}

pub struct FeedbackRepository<'a> {
    gateway: &'a StorageGateway,
    fallback: &'a FeedbackFallback,
}

impl<'a> FeedbackRepository<'a> {
    pub fn new(gateway: &'a StorageGateway, fallback: &'a FeedbackFallback) -> Self {
        Self { gateway, fallback }
    }

    pub async fn submit(&self, input: FeedbackInput) -> FeedbackResult<FeedbackSubmission> {
        self.submit_at(input, Utc::now()).await
    }

    #[instrument(skip(self, input))]
    pub async fn submit_at(
        &self,
        mut input: FeedbackInput,
        now: DateTime<Utc>,
    ) -> FeedbackResult<FeedbackSubmission> {
        let feedback = input
            .feedback
            .take()
            .filter(|text| !text.is_empty())
            .ok_or_else(|| FeedbackError::Validation(MSG_FEEDBACK_REQUIRED.to_string()))?;

        let draft = FeedbackDraft::new(input, feedback, now);

        if let Some(collection) = self.gateway.collection(CollectionName::Feedbacks).await {
            let id = collection.insert_one(serde_json::to_value(&draft)?).await?;
            let record = draft.into_record(id);
            tracing::info!(id = record.id, "feedback stored");

            return Ok(FeedbackSubmission {
                record,
                backing: Backing::Store,
            });
        }

        let record = self.fallback.push(draft, now).await;
        tracing::info!(id = record.id, "feedback kept in memory");

        Ok(FeedbackSubmission {
            record,
            backing: Backing::Fallback,
        })
    }

    /// Newest first when persisted; the in-memory fallback keeps insertion order
    #[instrument(skip(self))]
    pub async fn list(&self) -> FeedbackResult<Vec<FeedbackRecord>> {
        let Some(collection) = self.gateway.collection(CollectionName::Feedbacks).await else {
            return Ok(self.fallback.snapshot().await);
        };

        let mut records: Vec<FeedbackRecord> = collection
            .find_all()
            .await?
            .into_iter()
            .filter_map(|doc| match serde_json::from_value(doc) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!(error = ?e, "skipping malformed feedback document");
                    None
                }
            })
            .collect();

        records.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(records)
    }

    /// Stored documents exactly as persisted, latest `timestamp` first. Documents whose
    /// timestamp can't be read sort last.
    #[instrument(skip(self))]
    pub async fn list_persisted(&self) -> FeedbackResult<Vec<Value>> {
        let collection = self
            .gateway
            .collection(CollectionName::Feedbacks)
            .await
            .ok_or(FeedbackError::StorageUnavailable)?;

        let mut documents = collection.find_all().await?;
        let sort_key = |doc: &Value| doc.get("timestamp").and_then(Value::as_str).and_then(parse_loose);
        documents.sort_by(|a, b| sort_key(b).cmp(&sort_key(a)));

        Ok(documents)
    }
}

pub type FeedbackResult<T> = core::result::Result<T, FeedbackError>;

#[derive(Debug, Error)]
pub enum FeedbackError {
    #[error("{0}")]
    Validation(String),

    #[error("feedback storage unavailable")]
    StorageUnavailable,

    #[error(transparent)]
    Store(#[from] StoreErr),
}

impl From<serde_json::Error> for FeedbackError {
    fn from(value: serde_json::Error) -> Self {
        FeedbackError::Store(value.into())
    }
}
