// SPDX-FileCopyrightText: 2026 Cost Explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Non-blocking range locks for admin operations.
//!
//! Two holders conflict when their time ranges overlap and their filters may
//! select a common key. Acquisition never waits: a conflict is reported
//! immediately.

use std::sync::Arc;

use parking_lot::Mutex;

use cost_core::{CostError, DimensionFilter, TimeRange};

#[derive(Debug)]
struct Held {
    token: u64,
    range: TimeRange,
    filter: DimensionFilter,
}

#[derive(Debug, Default)]
struct Inner {
    held: Vec<Held>,
    next_token: u64,
}

/// Table of ranges currently held by admin operations.
#[derive(Debug, Default, Clone)]
pub struct RangeLockTable {
    inner: Arc<Mutex<Inner>>,
}

impl RangeLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes `(range, filter)` or fails with `ConcurrencyConflict`.
    pub fn try_acquire(
        &self,
        range: &TimeRange,
        filter: &DimensionFilter,
    ) -> Result<RangeLockGuard, CostError> {
        let mut inner = self.inner.lock();
        if let Some(conflict) = inner
            .held
            .iter()
            .find(|h| h.range.overlaps(range) && !h.filter.is_disjoint(filter))
        {
            return Err(CostError::ConcurrencyConflict {
                range: conflict.range,
            });
        }
        let token = inner.next_token;
        inner.next_token += 1;
        inner.held.push(Held {
            token,
            range: *range,
            filter: filter.clone(),
        });
        Ok(RangeLockGuard {
            table: Arc::clone(&self.inner),
            token,
            range: *range,
        })
    }

    pub fn held(&self) -> usize {
        self.inner.lock().held.len()
    }
}

/// Releases its range when dropped.
#[derive(Debug)]
pub struct RangeLockGuard {
    table: Arc<Mutex<Inner>>,
    token: u64,
    range: TimeRange,
}

impl RangeLockGuard {
    pub fn range(&self) -> &TimeRange {
        &self.range
    }
}

impl Drop for RangeLockGuard {
    fn drop(&mut self) {
        self.table.lock().held.retain(|h| h.token != self.token);
    }
}
