use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::util::dates::{DayWindow, parse_loose};

/// How a usage document encodes one of its date fields.
///
/// Date values use the extended-JSON form `{"$date": ...}`, holding either an ISO-8601 string
/// or epoch milliseconds. Anything else that isn't a plain string is kept as `Other` and ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RecordDate {
    Date {
        #[serde(rename = "$date")]
        date: DateValue,
    },
    Text(String),
    Other(Value),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum DateValue {
    Millis(i64),
    Iso(String),
}

impl RecordDate {
    fn is_date_like(&self) -> bool {
        !matches!(self, RecordDate::Other(_))
    }

    fn to_utc(&self) -> Option<DateTime<Utc>> {
        match self {
            RecordDate::Date {
                date: DateValue::Millis(millis),
            } => DateTime::from_timestamp_millis(*millis),
            RecordDate::Date {
                date: DateValue::Iso(iso),
            } => parse_loose(iso),
            RecordDate::Text(text) => parse_loose(text),
            RecordDate::Other(_) => None,
        }
    }
}

/// One activity document from a usage collection. Only the fields that place it in time or
/// weight it are read.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UsageRecord {
    #[serde(default)]
    pub day: Option<Value>,
    #[serde(default)]
    pub timestamp: Option<RecordDate>,
    #[serde(default)]
    pub created_at: Option<RecordDate>,
    #[serde(default)]
    pub count: Option<Value>,
}

impl UsageRecord {
    /// `timestamp` wins over `created_at`. Whichever is present decides the result on its own,
    /// so an unparseable `timestamp` string does not fall through to `created_at`.
    pub fn normalized_timestamp(&self) -> Option<DateTime<Utc>> {
        [&self.timestamp, &self.created_at]
            .into_iter()
            .flatten()
            .find(|date| date.is_date_like())
            .and_then(RecordDate::to_utc)
    }

    pub fn day_label(&self) -> Option<&str> {
        self.day.as_ref().and_then(Value::as_str)
    }

    /// Events this record stands for: its `count` when present, otherwise one. Fractions are
    /// truncated, negatives and non-numeric counts contribute nothing.
    pub fn weight(&self) -> u64 {
        match &self.count {
            None | Some(Value::Null) => 1,
            Some(Value::Number(n)) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| *f > 0.0).map(|f| f.trunc() as u64))
                .unwrap_or(0),
            Some(_) => 0,
        }
    }

    pub fn normalize(&self) -> NormalizedUsage {
        NormalizedUsage {
            day: self.day_label().map(str::to_owned),
            at: self.normalized_timestamp(),
            weight: self.weight(),
        }
    }
}

/// A usage record reduced to what day matching needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedUsage {
    pub day: Option<String>,
    pub at: Option<DateTime<Utc>>,
    pub weight: u64,
}

impl NormalizedUsage {
    /// Either signal is enough; a record matching on both still matches once
    pub fn falls_on(&self, window: &DayWindow) -> bool {
        self.day.as_deref() == Some(window.label.as_str())
            || self.at.is_some_and(|at| window.contains(&at))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCount {
    pub date: String,
    pub count: u64,
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn record(doc: Value) -> UsageRecord {
        serde_json::from_value(doc).unwrap()
    }

    #[test]
    fn test_timestamp_priority() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let other = "2023-01-01T00:00:00Z";

        let as_date = record(json!({
            "timestamp": { "$date": "2024-05-01T08:00:00Z" },
            "created_at": other,
        }));
        let as_string = record(json!({
            "timestamp": "2024-05-01T08:00:00Z",
            "created_at": { "$date": other },
        }));
        let created_date = record(json!({ "created_at": { "$date": 1714550400000i64 } }));
        let created_string = record(json!({ "created_at": "2024-05-01T08:00:00.000Z" }));

        assert_eq!(as_date.normalized_timestamp(), Some(expected));
        assert_eq!(as_string.normalized_timestamp(), Some(expected));
        assert_eq!(created_date.normalized_timestamp(), Some(expected));
        assert_eq!(created_string.normalized_timestamp(), Some(expected));
        assert_eq!(record(json!({ "day": "2024-05-01" })).normalized_timestamp(), None);
    }

    #[test]
    fn test_unparseable_timestamp_does_not_fall_through() {
        let rec = record(json!({
            "timestamp": "sometime",
            "created_at": "2024-05-01T08:00:00Z",
        }));
        assert_eq!(rec.normalized_timestamp(), None);

        // a non-date timestamp is skipped entirely
        let rec = record(json!({
            "timestamp": 42,
            "created_at": "2024-05-01T08:00:00Z",
        }));
        assert!(rec.normalized_timestamp().is_some());
    }

    #[test]
    fn test_weight() {
        assert_eq!(record(json!({})).weight(), 1);
        assert_eq!(record(json!({ "count": null })).weight(), 1);
        assert_eq!(record(json!({ "count": 5 })).weight(), 5);
        assert_eq!(record(json!({ "count": 2.9 })).weight(), 2);
        assert_eq!(record(json!({ "count": -3 })).weight(), 0);
        assert_eq!(record(json!({ "count": "7" })).weight(), 0);
    }

    #[test]
    fn test_falls_on_is_either_signal() {
        let window = DayWindow::new(chrono::NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());

        let by_day = record(json!({ "day": "2024-05-01" })).normalize();
        let by_time = record(json!({ "timestamp": "2024-05-01T23:59:59Z" })).normalize();
        let mismatched = record(json!({
            "day": "2024-05-01",
            "timestamp": "2024-05-03T10:00:00Z",
        }))
        .normalize();
        let neither = record(json!({ "day": 20240501, "timestamp": "2024-05-02T00:00:00Z" }))
            .normalize();

        assert!(by_day.falls_on(&window));
        assert!(by_time.falls_on(&window));
        assert!(mismatched.falls_on(&window));
        assert!(!neither.falls_on(&window));
    }
}
