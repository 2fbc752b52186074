// SPDX-FileCopyrightText: 2026 Cost Explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Invalidation marks.

use chrono::{DateTime, Utc};
use serde::Serialize;

use cost_core::{DimensionFilter, DimensionKey, TimeRange};

/// Records that the cells in `(range, filter)` are stale until a recompute
/// covering the mark completes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvalidationMark {
    /// Creation order; a recompute only clears marks older than itself.
    pub id: u64,
    /// Bucket-aligned range.
    pub range: TimeRange,
    pub filter: DimensionFilter,
    pub created_at: DateTime<Utc>,
}

impl InvalidationMark {
    pub fn covers_cell(&self, bucket_start: DateTime<Utc>, key: &DimensionKey) -> bool {
        self.range.contains(bucket_start) && self.filter.matches(key)
    }

    /// Whether a recompute of `(range, filter)` rebuilds every cell this mark covers.
    pub fn cleared_by(&self, range: &TimeRange, filter: &DimensionFilter) -> bool {
        range.covers(&self.range) && self.filter.implies(filter)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn range(from: u32, to: u32) -> TimeRange {
        TimeRange::new(
            Utc.with_ymd_and_hms(2026, 1, from, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 1, to, 0, 0, 0).unwrap(),
        )
        .unwrap()
    }

    fn mark(filter: DimensionFilter) -> InvalidationMark {
        InvalidationMark {
            id: 0,
            range: range(2, 4),
            filter,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn cleared_only_by_covering_recompute() {
        let m = mark(DimensionFilter::all().with("user", ["alice"]));
        assert!(m.cleared_by(&range(1, 5), &DimensionFilter::all()));
        assert!(m.cleared_by(&range(2, 4), &DimensionFilter::all().with("user", ["alice", "bob"])));
        assert!(!m.cleared_by(&range(3, 5), &DimensionFilter::all()));
        assert!(!m.cleared_by(&range(1, 5), &DimensionFilter::all().with("user", ["bob"])));
    }

    #[test]
    fn unfiltered_mark_needs_unfiltered_recompute() {
        let m = mark(DimensionFilter::all());
        assert!(!m.cleared_by(&range(1, 5), &DimensionFilter::all().with("user", ["alice"])));
    }
}
