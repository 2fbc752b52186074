// SPDX-FileCopyrightText: 2026 Cost Explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Read side of the record store, as seen by the aggregation engine.

use std::sync::Arc;

use async_trait::async_trait;

use crate::dimension::DimensionFilter;
use crate::error::CostError;
use crate::scan::{ScanCursor, ScanPage, Snapshot};
use crate::time::TimeRange;
use crate::types::StoredRecord;

/// Snapshot-consistent paged reads over stored records.
#[async_trait]
pub trait RecordSource: Send + Sync + 'static {
    /// Takes a snapshot of the current watermark and withdrawal epoch.
    fn snapshot(&self) -> Snapshot;

    /// Smallest range containing every live record, or `None` when empty.
    fn time_bounds(&self) -> Option<TimeRange>;

    /// Reads up to `limit` index entries after `after`, returning those
    /// visible to `snapshot` that fall in `range` and match `filter`.
    async fn scan_page(
        &self,
        snapshot: &Snapshot,
        range: &TimeRange,
        filter: &DimensionFilter,
        after: Option<ScanCursor>,
        limit: usize,
    ) -> Result<ScanPage, CostError>;
}

/// Notified synchronously after each successful append, in append order.
pub trait AppendListener: Send + Sync {
    fn on_append(&self, record: &Arc<StoredRecord>);
}
