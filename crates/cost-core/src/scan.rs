// SPDX-FileCopyrightText: 2026 Cost Explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Snapshot-consistent, lazily paged scans over a [`RecordSource`].

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::dimension::DimensionFilter;
use crate::error::CostError;
use crate::time::TimeRange;
use crate::traits::RecordSource;
use crate::types::{RecordId, StoredRecord};

/// Point-in-time view of a record source.
///
/// A record is visible to the snapshot when its id is below `watermark` and
/// it had not been withdrawn at `epoch`. The optional lease keeps withdrawn
/// records from being compacted away while the snapshot is alive.
#[derive(Clone)]
pub struct Snapshot {
    pub watermark: RecordId,
    pub epoch: u64,
    lease: Option<Arc<dyn Any + Send + Sync>>,
}

impl Snapshot {
    pub fn new(watermark: RecordId, epoch: u64) -> Self {
        Self {
            watermark,
            epoch,
            lease: None,
        }
    }

    /// Attaches a lease released when the last clone of this snapshot drops.
    pub fn with_lease(mut self, lease: Arc<dyn Any + Send + Sync>) -> Self {
        self.lease = Some(lease);
        self
    }

    pub fn includes(&self, record: &StoredRecord) -> bool {
        record.id < self.watermark && record.visible_at(self.epoch)
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("watermark", &self.watermark)
            .field("epoch", &self.epoch)
            .field("leased", &self.lease.is_some())
            .finish()
    }
}

/// Position in `(timestamp, id)` order. Scans resume strictly after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScanCursor {
    pub timestamp: DateTime<Utc>,
    pub id: RecordId,
}

/// One page of a scan. `next` is `None` once the range is exhausted.
#[derive(Debug, Default)]
pub struct ScanPage {
    pub records: Vec<Arc<StoredRecord>>,
    pub next: Option<ScanCursor>,
}

/// Lazy, finite, restartable scan ordered by `(timestamp, id)`.
///
/// The snapshot is taken when the scan is created; restarting replays the
/// same snapshot, so records appended or withdrawn afterwards never appear
/// or disappear mid-scan.
pub struct Scan {
    source: Arc<dyn RecordSource>,
    snapshot: Snapshot,
    range: TimeRange,
    filter: DimensionFilter,
    page_size: usize,
    cursor: Option<ScanCursor>,
    done: bool,
}

impl Scan {
    pub fn new(
        source: Arc<dyn RecordSource>,
        range: TimeRange,
        filter: DimensionFilter,
        page_size: usize,
    ) -> Self {
        let snapshot = source.snapshot();
        Self::at(source, snapshot, range, filter, page_size)
    }

    /// Scan pinned to an existing snapshot.
    pub fn at(
        source: Arc<dyn RecordSource>,
        snapshot: Snapshot,
        range: TimeRange,
        filter: DimensionFilter,
        page_size: usize,
    ) -> Self {
        Self {
            source,
            snapshot,
            range,
            filter,
            page_size: page_size.max(1),
            cursor: None,
            done: false,
        }
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn range(&self) -> &TimeRange {
        &self.range
    }

    /// Returns the next non-empty page, or `None` when the scan is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<Vec<Arc<StoredRecord>>>, CostError> {
        while !self.done {
            let page = self
                .source
                .scan_page(
                    &self.snapshot,
                    &self.range,
                    &self.filter,
                    self.cursor,
                    self.page_size,
                )
                .await?;
            match page.next {
                Some(next) => self.cursor = Some(next),
                None => self.done = true,
            }
            if !page.records.is_empty() {
                return Ok(Some(page.records));
            }
        }
        Ok(None)
    }

    /// Rewinds to the beginning of the range, keeping the original snapshot.
    pub fn restart(&mut self) {
        self.cursor = None;
        self.done = false;
    }

    /// Drains the remaining pages into one vector.
    pub async fn collect(mut self) -> Result<Vec<Arc<StoredRecord>>, CostError> {
        let mut out = Vec::new();
        while let Some(page) = self.next_page().await? {
            out.extend(page);
        }
        Ok(out)
    }
}

impl fmt::Debug for Scan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scan")
            .field("snapshot", &self.snapshot)
            .field("range", &self.range)
            .field("filter", &self.filter)
            .field("cursor", &self.cursor)
            .field("done", &self.done)
            .finish()
    }
}
