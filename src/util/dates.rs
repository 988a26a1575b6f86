use chrono::{DateTime, Datelike, Days, Duration, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use tracing::instrument;

use crate::constants::{
    BANGKOK_UTC_OFFSET_HOURS, BUDDHIST_ERA_OFFSET, DAY_FORMAT, DEFAULT_BREAKDOWN_DAYS,
    MAX_BREAKDOWN_DAYS,
};

/// Offset-less datetimes are read as UTC
const NAIVE_DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

const DATE_FORMATS: [&str; 2] = [DAY_FORMAT, "%Y/%m/%d"];

/// Parses the date shapes clients and stored documents actually use: RFC 3339, RFC 2822, naive
/// datetimes, bare dates (midnight UTC) and integer epoch milliseconds.
pub fn parse_loose(input: &str) -> Option<DateTime<Utc>> {
    let raw = input.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Some(ndt) = NAIVE_DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
    {
        return Some(ndt.and_utc());
    }

    if let Some(date) = DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
    {
        return date.and_hms_opt(0, 0, 0).map(|ndt| ndt.and_utc());
    }

    raw.parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_millis)
}

/// Resolves a requested day. Missing input means today; unparseable input is logged and also
/// resolves to today rather than failing the request.
#[instrument(skip(now))]
pub fn target_day(input: Option<&str>, now: DateTime<Utc>) -> NaiveDate {
    let Some(raw) = input.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return now.date_naive();
    };

    match parse_loose(raw).map(|dt| dt.date_naive()).filter(has_room) {
        Some(day) => day,
        None => {
            tracing::warn!(input = raw, "unparseable date, using the current day");
            now.date_naive()
        }
    }
}

/// Days too close to the ends of the calendar to hold a full window or a maximal range are
/// treated as unparseable
fn has_room(day: &NaiveDate) -> bool {
    day.checked_add_days(Days::new(1)).is_some()
        && day
            .checked_sub_days(Days::new(MAX_BREAKDOWN_DAYS as u64))
            .is_some()
}

fn days_before(day: NaiveDate, count: i64) -> NaiveDate {
    day.checked_sub_days(Days::new(count.max(0) as u64))
        .unwrap_or(NaiveDate::MIN)
}

/// The UTC interval `[00:00:00.000, 23:59:59.999]` of one calendar day
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayWindow {
    pub day: NaiveDate,
    pub label: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DayWindow {
    pub fn new(day: NaiveDate) -> Self {
        let start = day.and_time(chrono::NaiveTime::MIN).and_utc();
        let end = start
            .checked_add_signed(Duration::days(1))
            .and_then(|next| next.checked_sub_signed(Duration::milliseconds(1)))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self {
            day,
            label: day.format(DAY_FORMAT).to_string(),
            start,
            end,
        }
    }

    pub fn contains(&self, at: &DateTime<Utc>) -> bool {
        // sub-millisecond precision past `end` still belongs to this day
        at.date_naive() == self.day
    }
}

/// Inclusive range of calendar days, oldest first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DayRange {
    /// Defaults to the week ending on `to` (or today). Reversed bounds are swapped and ranges
    /// longer than the maximum keep their most recent days.
    pub fn resolve(from: Option<&str>, to: Option<&str>, now: DateTime<Utc>) -> Self {
        let to_day = target_day(to, now);
        let from_day = match from.map(str::trim).filter(|raw| !raw.is_empty()) {
            Some(raw) => target_day(Some(raw), now),
            None => days_before(to_day, DEFAULT_BREAKDOWN_DAYS - 1),
        };

        let (from_day, to_day) = if from_day > to_day {
            (to_day, from_day)
        } else {
            (from_day, to_day)
        };

        let earliest = days_before(to_day, MAX_BREAKDOWN_DAYS - 1);
        Self {
            from: from_day.max(earliest),
            to: to_day,
        }
    }

    pub fn windows(&self) -> Vec<DayWindow> {
        self.from
            .iter_days()
            .take_while(|day| *day <= self.to)
            .map(DayWindow::new)
            .collect()
    }
}

pub fn iso_millis(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// `DD/MM/YYYY HH:MM:SS` in Bangkok time with a Buddhist-era year, as the Thai locale displays it
pub fn thai_display_timestamp(at: DateTime<Utc>) -> String {
    // Asia/Bangkok observes no daylight saving
    let local = at.naive_utc() + Duration::hours(BANGKOK_UTC_OFFSET_HOURS);

    format!(
        "{:02}/{:02}/{} {}",
        local.day(),
        local.month(),
        local.year() + BUDDHIST_ERA_OFFSET,
        local.format("%H:%M:%S")
    )
}
