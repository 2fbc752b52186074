// SPDX-FileCopyrightText: 2026 Cost Explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Time buckets, ranges, and granularities.
//!
//! All ranges are half-open `[start, end)` in UTC. A [`TimeBucket`] is a range
//! aligned to the engine's base [`Granularity`]; aggregate cells are keyed by it.

use std::fmt;

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::CostError;

/// Width of a time bucket.
///
/// Ordered from finest to coarsest, so `a <= b` means `a` is at least as fine as `b`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumString,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Granularity {
    Hour,
    Day,
    Month,
}

impl Granularity {
    /// Fixed-width granularities can serve as the base bucket width of the engine.
    pub fn is_fixed(self) -> bool {
        !matches!(self, Granularity::Month)
    }

    /// Truncates `ts` to the start of the bucket containing it.
    pub fn truncate(self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let date = ts.date_naive();
        match self {
            Granularity::Hour => Utc.from_utc_datetime(
                &date
                    .and_hms_opt(ts.hour(), 0, 0)
                    .unwrap_or_else(|| date.and_time(chrono::NaiveTime::MIN)),
            ),
            Granularity::Day => Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN)),
            Granularity::Month => {
                let first = date.with_day(1).unwrap_or(date);
                Utc.from_utc_datetime(&first.and_time(chrono::NaiveTime::MIN))
            }
        }
    }

    /// Returns the start of the bucket following the one starting at `start`.
    ///
    /// Saturates at the largest representable instant.
    pub fn next(self, start: DateTime<Utc>) -> DateTime<Utc> {
        let next = match self {
            Granularity::Hour => start.checked_add_signed(Duration::hours(1)),
            Granularity::Day => start.checked_add_signed(Duration::days(1)),
            Granularity::Month => start.checked_add_months(Months::new(1)),
        };
        next.unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Number of buckets of this granularity intersecting `range`.
    pub fn bucket_count(self, range: &TimeRange) -> u64 {
        let first = self.truncate(range.start);
        let last = self.truncate(range.end - Duration::nanoseconds(1));
        match self {
            Granularity::Hour => ((last - first).num_hours() + 1) as u64,
            Granularity::Day => ((last - first).num_days() + 1) as u64,
            Granularity::Month => {
                let months = (last.year() - first.year()) * 12 + last.month() as i32
                    - first.month() as i32;
                (months + 1) as u64
            }
        }
    }
}

/// A half-open interval `[start, end)` aligned to one bucket of a granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeBucket {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeBucket {
    /// The bucket of `granularity` containing `ts`.
    pub fn containing(ts: DateTime<Utc>, granularity: Granularity) -> Self {
        let start = granularity.truncate(ts);
        Self {
            start,
            end: granularity.next(start),
        }
    }

    /// The bucket as a [`TimeRange`].
    pub fn range(&self) -> TimeRange {
        TimeRange {
            start: self.start,
            end: self.end,
        }
    }
}

/// A half-open time interval `[start, end)` with `start < end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawTimeRange")]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RawTimeRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TryFrom<RawTimeRange> for TimeRange {
    type Error = CostError;

    fn try_from(raw: RawTimeRange) -> Result<Self, Self::Error> {
        TimeRange::new(raw.start, raw.end)
    }
}

impl TimeRange {
    /// Creates a range, rejecting empty or inverted intervals.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, CostError> {
        if start >= end {
            return Err(CostError::Validation(format!(
                "time range start {start} must be before end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// Range covering whole days from `first` through `last` inclusive.
    pub fn from_dates(first: NaiveDate, last: NaiveDate) -> Result<Self, CostError> {
        let start = Utc.from_utc_datetime(&first.and_time(chrono::NaiveTime::MIN));
        let end = last
            .succ_opt()
            .map(|d| Utc.from_utc_datetime(&d.and_time(chrono::NaiveTime::MIN)))
            .ok_or_else(|| CostError::Validation(format!("date {last} is out of range")))?;
        Self::new(start, end)
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts < self.end
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Whether `other` lies entirely inside this range.
    pub fn covers(&self, other: &TimeRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Smallest range containing both.
    pub fn hull(&self, other: &TimeRange) -> TimeRange {
        TimeRange {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// Overlapping part of both ranges, if any.
    pub fn intersection(&self, other: &TimeRange) -> Option<TimeRange> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start < end).then_some(TimeRange { start, end })
    }

    /// Expands the range outward to whole buckets of `granularity`.
    pub fn align(&self, granularity: Granularity) -> TimeRange {
        let start = granularity.truncate(self.start);
        let last = granularity.truncate(self.end - Duration::nanoseconds(1));
        TimeRange {
            start,
            end: granularity.next(last),
        }
    }

    /// Iterates the buckets of `granularity` intersecting this range, in order.
    pub fn buckets(&self, granularity: Granularity) -> impl Iterator<Item = TimeBucket> + '_ {
        let mut cursor = granularity.truncate(self.start);
        let end = self.end;
        std::iter::from_fn(move || {
            if cursor >= end {
                return None;
            }
            let bucket = TimeBucket {
                start: cursor,
                end: granularity.next(cursor),
            };
            if bucket.end <= cursor {
                return None;
            }
            cursor = bucket.end;
            Some(bucket)
        })
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// Named reporting windows accepted by the dashboard views.
///
/// Every window ends with (and includes) the current day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
pub enum Period {
    #[strum(serialize = "7d")]
    Last7Days,
    #[default]
    #[strum(serialize = "30d")]
    Last30Days,
    #[strum(serialize = "month")]
    MonthToDate,
    #[strum(serialize = "last_month")]
    LastMonth,
    #[strum(serialize = "3m")]
    Last3Months,
    #[strum(serialize = "6m")]
    Last6Months,
    #[strum(serialize = "12m")]
    Last12Months,
}

impl Period {
    /// Parses a period name, falling back to the 30-day window for unknown names.
    pub fn parse_or_default(name: &str) -> Self {
        name.parse().unwrap_or_else(|_| {
            tracing::debug!(period = name, "unknown period, using 30d");
            Period::default()
        })
    }

    /// Resolves the window relative to `today`.
    pub fn resolve(self, today: NaiveDate) -> Result<TimeRange, CostError> {
        let (first, last) = match self {
            Period::Last7Days => (today - Duration::days(6), today),
            Period::Last30Days => (today - Duration::days(29), today),
            Period::MonthToDate => (today.with_day(1).unwrap_or(today), today),
            Period::LastMonth => {
                let first_of_current = today.with_day(1).unwrap_or(today);
                let last_of_prev = first_of_current - Duration::days(1);
                (last_of_prev.with_day(1).unwrap_or(last_of_prev), last_of_prev)
            }
            Period::Last3Months => (today - Duration::days(90), today),
            Period::Last6Months => (today - Duration::days(180), today),
            Period::Last12Months => (today - Duration::days(365), today),
        };
        TimeRange::from_dates(first, last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn truncate_hour_day_month() {
        let t = Utc.with_ymd_and_hms(2026, 3, 14, 15, 9, 26).unwrap();
        assert_eq!(Granularity::Hour.truncate(t), ts(2026, 3, 14, 15));
        assert_eq!(Granularity::Day.truncate(t), ts(2026, 3, 14, 0));
        assert_eq!(Granularity::Month.truncate(t), ts(2026, 3, 1, 0));
    }

    #[test]
    fn month_next_crosses_year() {
        assert_eq!(Granularity::Month.next(ts(2025, 12, 1, 0)), ts(2026, 1, 1, 0));
    }

    #[test]
    fn range_rejects_empty_interval() {
        let t = ts(2026, 1, 1, 0);
        assert!(matches!(TimeRange::new(t, t), Err(CostError::Validation(_))));
    }

    #[test]
    fn bucket_count_ten_years_hourly() {
        let range = TimeRange::new(ts(2016, 1, 1, 0), ts(2026, 1, 1, 0)).unwrap();
        assert_eq!(Granularity::Hour.bucket_count(&range), 87_672);
        assert_eq!(Granularity::Month.bucket_count(&range), 120);
    }

    #[test]
    fn bucket_count_matches_iteration() {
        let range = TimeRange::new(
            Utc.with_ymd_and_hms(2026, 2, 27, 22, 30, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 3, 2, 1, 15, 0).unwrap(),
        )
        .unwrap();
        for g in [Granularity::Hour, Granularity::Day, Granularity::Month] {
            assert_eq!(g.bucket_count(&range), range.buckets(g).count() as u64, "{g}");
        }
    }

    #[test]
    fn align_expands_to_whole_buckets() {
        let range = TimeRange::new(
            Utc.with_ymd_and_hms(2026, 1, 1, 10, 30, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 1, 1, 11, 30, 0).unwrap(),
        )
        .unwrap();
        let aligned = range.align(Granularity::Hour);
        assert_eq!(aligned.start, ts(2026, 1, 1, 10));
        assert_eq!(aligned.end, ts(2026, 1, 1, 12));
    }

    #[test]
    fn overlap_is_half_open() {
        let a = TimeRange::new(ts(2026, 1, 1, 0), ts(2026, 1, 1, 2)).unwrap();
        let b = TimeRange::new(ts(2026, 1, 1, 2), ts(2026, 1, 1, 4)).unwrap();
        let c = TimeRange::new(ts(2026, 1, 1, 1), ts(2026, 1, 1, 3)).unwrap();
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!(c.overlaps(&b));
    }

    #[test]
    fn deserialize_validates_range() {
        let bad = r#"{"start":"2026-01-02T00:00:00Z","end":"2026-01-01T00:00:00Z"}"#;
        assert!(serde_json::from_str::<TimeRange>(bad).is_err());
        let good = r#"{"start":"2026-01-01T00:00:00Z","end":"2026-01-02T00:00:00Z"}"#;
        assert!(serde_json::from_str::<TimeRange>(good).is_ok());
    }

    #[test]
    fn period_windows_include_today() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 15).unwrap();
        let week = Period::Last7Days.resolve(today).unwrap();
        assert_eq!(week.start, ts(2026, 3, 9, 0));
        assert_eq!(week.end, ts(2026, 3, 16, 0));

        let month = Period::MonthToDate.resolve(today).unwrap();
        assert_eq!(month.start, ts(2026, 3, 1, 0));

        let last = Period::LastMonth.resolve(today).unwrap();
        assert_eq!(last.start, ts(2026, 2, 1, 0));
        assert_eq!(last.end, ts(2026, 3, 1, 0));
    }

    #[test]
    fn unknown_period_defaults_to_thirty_days() {
        assert_eq!(Period::parse_or_default("fortnight"), Period::Last30Days);
        assert_eq!(Period::parse_or_default("12m"), Period::Last12Months);
    }
}
