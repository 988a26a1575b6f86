use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::instrument;

use crate::db::models::usage::NormalizedUsage;
use crate::db::prelude::{DailyCount, UsageRecord};
use crate::db::{Collection, CollectionName, StorageGateway, StoreErr};
use crate::util::dates::{DayRange, DayWindow, target_day};

pub struct UsageRepository<'a> {
    gateway: &'a StorageGateway,
}

impl<'a> UsageRepository<'a> {
    pub fn new(gateway: &'a StorageGateway) -> Self {
        Self { gateway }
    }

    pub async fn count_usage(
        &self,
        name: CollectionName,
        target: Option<&str>,
    ) -> UsageResult<DailyCount> {
        self.count_usage_at(name, target, Utc::now()).await
    }

    /// Sums the weight of every record in `name` that falls on the requested day
    #[instrument(skip(self, now))]
    pub async fn count_usage_at(
        &self,
        name: CollectionName,
        target: Option<&str>,
        now: DateTime<Utc>,
    ) -> UsageResult<DailyCount> {
        let collection = self.open(name).await?;
        let window = DayWindow::new(target_day(target, now));
        let records = load_normalized(&collection).await?;

        let result = tally(&records, &window);
        tracing::debug!(
            date = result.date,
            window_start = %window.start,
            window_end = %window.end,
            count = result.count,
            "usage counted"
        );

        Ok(result)
    }

    pub async fn daily_breakdown(
        &self,
        name: CollectionName,
        from: Option<&str>,
        to: Option<&str>,
    ) -> UsageResult<Vec<DailyCount>> {
        self.daily_breakdown_at(name, from, to, Utc::now()).await
    }

    /// One entry per day of the range, oldest first, each equal to what `count_usage` reports
    /// for that day
    #[instrument(skip(self, now))]
    pub async fn daily_breakdown_at(
        &self,
        name: CollectionName,
        from: Option<&str>,
        to: Option<&str>,
        now: DateTime<Utc>,
    ) -> UsageResult<Vec<DailyCount>> {
        let collection = self.open(name).await?;
        let range = DayRange::resolve(from, to, now);
        let records = load_normalized(&collection).await?;

        let days: Vec<DailyCount> = range
            .windows()
            .iter()
            .map(|window| tally(&records, window))
            .collect();

        tracing::debug!(
            from = %range.from,
            to = %range.to,
            days = days.len(),
            "usage breakdown computed"
        );

        Ok(days)
    }

    async fn open(&self, name: CollectionName) -> UsageResult<Collection> {
        self.gateway
            .collection(name)
            .await
            .ok_or(UsageError::StorageUnavailable(name))
    }
}

async fn load_normalized(collection: &Collection) -> UsageResult<Vec<NormalizedUsage>> {
    Ok(collection
        .find_all()
        .await?
        .into_iter()
        .filter_map(|doc| match serde_json::from_value::<UsageRecord>(doc) {
            Ok(record) => Some(record.normalize()),
            Err(e) => {
                tracing::debug!(error = ?e, "skipping non-object usage document");
                None
            }
        })
        .collect())
}

fn tally(records: &[NormalizedUsage], window: &DayWindow) -> DailyCount {
    let count = records
        .iter()
        .filter(|record| record.falls_on(window))
        .fold(0u64, |total, record| total.saturating_add(record.weight));

    DailyCount {
        date: window.label.clone(),
        count,
    }
}

pub type UsageResult<T> = core::result::Result<T, UsageError>;

#[derive(Debug, Error)]
pub enum UsageError {
    #[error("storage unavailable for collection {0}")]
    StorageUnavailable(CollectionName),

    #[error(transparent)]
    Store(#[from] StoreErr),
}
