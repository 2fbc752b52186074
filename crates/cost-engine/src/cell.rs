// SPDX-FileCopyrightText: 2026 Cost Explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Aggregate cells keyed by `(TimeBucket, DimensionKey)`.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use cost_core::{DimensionKey, RecordId, TimeBucket};

/// Identity of a cell: the base bucket start and the full dimension key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId {
    pub bucket_start: DateTime<Utc>,
    pub key: DimensionKey,
}

impl CellId {
    pub fn new(bucket_start: DateTime<Utc>, key: DimensionKey) -> Self {
        Self { bucket_start, key }
    }
}

/// Result of applying one record to its cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncrementOutcome {
    Applied,
    /// The id was already counted.
    Duplicate,
    /// The id predates the cell's last rebuild, which already counted it.
    BelowFloor,
    /// The sum would exceed the representable range; the cell is now stale.
    Overflowed,
}

impl IncrementOutcome {
    pub(crate) fn label(self) -> &'static str {
        match self {
            IncrementOutcome::Applied => "applied",
            IncrementOutcome::Duplicate => "duplicate",
            IncrementOutcome::BelowFloor => "below_floor",
            IncrementOutcome::Overflowed => "overflowed",
        }
    }
}

#[derive(Debug)]
pub(crate) struct CellState {
    pub sum_cost: Decimal,
    pub record_count: u64,
    pub last_updated: Option<RecordId>,
    /// Most recent ids applied, bounded by the dedup window.
    pub recent: BTreeSet<RecordId>,
    /// Ids below the floor were reflected by the last rebuild.
    pub floor: RecordId,
    pub stale: bool,
    /// Set once the cell has been removed from the arena.
    pub retired: bool,
}

impl CellState {
    pub fn new(stale: bool) -> Self {
        Self {
            sum_cost: Decimal::ZERO,
            record_count: 0,
            last_updated: None,
            recent: BTreeSet::new(),
            floor: RecordId(0),
            stale,
            retired: false,
        }
    }

    /// Adds one record unless it was already counted.
    ///
    /// Ids reach a cell in append order, so once the window is full any id
    /// older than its oldest entry must have been seen before.
    pub fn apply(&mut self, id: RecordId, cost: Decimal, window: usize) -> IncrementOutcome {
        if id < self.floor {
            return IncrementOutcome::BelowFloor;
        }
        if self.recent.contains(&id) {
            return IncrementOutcome::Duplicate;
        }
        if self.recent.len() >= window
            && self.recent.first().is_some_and(|oldest| id < *oldest)
        {
            return IncrementOutcome::Duplicate;
        }
        let Some(sum) = self.sum_cost.checked_add(cost) else {
            self.stale = true;
            return IncrementOutcome::Overflowed;
        };
        self.sum_cost = sum;
        self.record_count += 1;
        self.last_updated = self.last_updated.max(Some(id));
        self.recent.insert(id);
        while self.recent.len() > window {
            self.recent.pop_first();
        }
        IncrementOutcome::Applied
    }
}

/// Read-only view of a cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellSnapshot {
    pub bucket: TimeBucket,
    pub key: DimensionKey,
    pub sum_cost: Decimal,
    pub record_count: u64,
    pub last_updated_record_id: Option<RecordId>,
    pub stale: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_id_is_counted_once() {
        let mut cell = CellState::new(false);
        assert_eq!(cell.apply(RecordId(1), Decimal::ONE, 4), IncrementOutcome::Applied);
        assert_eq!(cell.apply(RecordId(1), Decimal::ONE, 4), IncrementOutcome::Duplicate);
        assert_eq!(cell.sum_cost, Decimal::ONE);
        assert_eq!(cell.record_count, 1);
    }

    #[test]
    fn ids_older_than_full_window_are_rejected() {
        let mut cell = CellState::new(false);
        for id in 10..12 {
            cell.apply(RecordId(id), Decimal::ONE, 2);
        }
        assert_eq!(cell.apply(RecordId(3), Decimal::ONE, 2), IncrementOutcome::Duplicate);
        assert_eq!(cell.recent.len(), 2);
        assert_eq!(cell.last_updated, Some(RecordId(11)));
    }

    #[test]
    fn floor_rejects_rebuilt_ids() {
        let mut cell = CellState::new(false);
        cell.floor = RecordId(5);
        assert_eq!(cell.apply(RecordId(4), Decimal::ONE, 8), IncrementOutcome::BelowFloor);
        assert_eq!(cell.apply(RecordId(5), Decimal::ONE, 8), IncrementOutcome::Applied);
    }

    #[test]
    fn sum_past_decimal_max_marks_stale_without_counting() {
        let mut cell = CellState::new(false);
        assert_eq!(cell.apply(RecordId(1), Decimal::MAX, 8), IncrementOutcome::Applied);
        assert_eq!(cell.apply(RecordId(2), Decimal::MAX, 8), IncrementOutcome::Overflowed);
        assert_eq!(cell.sum_cost, Decimal::MAX);
        assert_eq!(cell.record_count, 1);
        assert!(cell.stale);
        assert!(!cell.recent.contains(&RecordId(2)));
    }
}
