use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::util::dates::{iso_millis, thai_display_timestamp};

/// Request body for a feedback submission
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedbackInput {
    pub feedback: Option<String>,
    pub timestamp: Option<String>,
    pub name: Option<String>,
    pub phone: Option<String>,
}

/// A feedback record before an identifier has been assigned
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackDraft {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub feedback: String,
    pub timestamp: String,
    pub created_at: String,
}

impl FeedbackDraft {
    /// `feedback` has already been validated as non-empty. Blank optional fields are stored as
    /// null, and a missing client timestamp is replaced by `now`.
    pub fn new(input: FeedbackInput, feedback: String, now: DateTime<Utc>) -> Self {
        let non_empty = |field: Option<String>| field.filter(|value| !value.is_empty());

        Self {
            name: non_empty(input.name),
            phone: non_empty(input.phone),
            feedback,
            timestamp: non_empty(input.timestamp).unwrap_or_else(|| iso_millis(now)),
            created_at: thai_display_timestamp(now),
        }
    }

    pub fn into_record(self, id: i64) -> FeedbackRecord {
        FeedbackRecord {
            id,
            name: self.name,
            phone: self.phone,
            feedback: self.feedback,
            timestamp: self.timestamp,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRecord {
    #[serde(alias = "_id")]
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    pub feedback: String,
    pub timestamp: String,
    pub created_at: String,
}
