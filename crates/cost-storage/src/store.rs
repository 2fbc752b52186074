// SPDX-FileCopyrightText: 2026 Cost Explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The record store: single writer, snapshot-isolated readers.
//!
//! Every mutation goes through the async writer mutex, commits to the backend,
//! and only then touches the in-memory index. The index lock is held for one
//! batch at a time so scans interleave with appends.
//!
//! Withdrawals (replace and retention) bump the store epoch. A withdrawn
//! record stays in the index, still visible to snapshots older than its
//! withdrawal epoch, until [`RecordStore::compact`] finds no live snapshot
//! that can see it.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use cost_core::{
    AppendListener, CostError, DimensionFilter, DimensionKey, Interner, RecordBackend, RecordId,
    RecordSource, Scan, ScanCursor, ScanPage, Snapshot, StoredRecord, TimeRange, UsageRecord,
    WriteBatch,
};

use crate::policy::IngestPolicy;

const DEFAULT_PAGE_SIZE: usize = 512;

type IndexKey = (DateTime<Utc>, RecordId);

#[derive(Default)]
struct Index {
    records: BTreeMap<IndexKey, Arc<StoredRecord>>,
    /// Withdrawn records still present in `records`, awaiting compaction.
    withdrawn: Vec<Arc<StoredRecord>>,
    next_id: RecordId,
    epoch: u64,
    live: usize,
}

impl Index {
    fn insert(&mut self, record: Arc<StoredRecord>) {
        self.records.insert((record.timestamp(), record.id), record);
        self.live += 1;
    }

    fn withdraw(&mut self, records: &[Arc<StoredRecord>]) {
        if records.is_empty() {
            return;
        }
        self.epoch += 1;
        for record in records {
            record.mark_withdrawn(self.epoch);
            self.withdrawn.push(Arc::clone(record));
        }
        self.live -= records.len();
    }

    fn active_in(&self, range: &TimeRange, filter: &DimensionFilter) -> Vec<Arc<StoredRecord>> {
        self.records
            .range((range.start, RecordId(0))..(range.end, RecordId(0)))
            .map(|(_, r)| r)
            .filter(|r| r.is_active() && filter.matches(&r.key))
            .cloned()
            .collect()
    }
}

/// Counts live snapshots per epoch so compaction knows what is still visible.
#[derive(Default)]
struct LeaseTable {
    epochs: Mutex<BTreeMap<u64, usize>>,
}

impl LeaseTable {
    fn min_epoch(&self) -> Option<u64> {
        self.epochs.lock().keys().next().copied()
    }
}

struct Lease {
    table: Arc<LeaseTable>,
    epoch: u64,
}

impl Drop for Lease {
    fn drop(&mut self) {
        let mut epochs = self.table.epochs.lock();
        if let Some(count) = epochs.get_mut(&self.epoch) {
            *count -= 1;
            if *count == 0 {
                epochs.remove(&self.epoch);
            }
        }
    }
}

/// What a [`RecordStore::replace`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaceOutcome {
    pub withdrawn: usize,
    pub appended: Vec<RecordId>,
    /// Hull of every withdrawn and appended timestamp, `None` if nothing changed.
    pub touched: Option<TimeRange>,
}

/// Append-only store of usage records.
pub struct RecordStore {
    backend: Arc<dyn RecordBackend>,
    policy: IngestPolicy,
    interner: Arc<Interner>,
    writer: tokio::sync::Mutex<()>,
    index: RwLock<Index>,
    listeners: RwLock<Vec<Weak<dyn AppendListener>>>,
    leases: Arc<LeaseTable>,
    closed: AtomicBool,
    page_size: usize,
}

impl RecordStore {
    /// Opens the store, reloading every record persisted by `backend`.
    pub async fn open(
        policy: IngestPolicy,
        backend: Arc<dyn RecordBackend>,
    ) -> Result<Self, CostError> {
        let interner = Arc::new(Interner::new());
        let persisted = backend.load().await?;
        let mut index = Index {
            next_id: RecordId(1),
            ..Index::default()
        };
        for (id, record) in persisted {
            let cost = record.cost()?;
            let key = DimensionKey::from_map(&record.dimensions, &interner);
            index.next_id = index.next_id.max(id.next());
            index.insert(Arc::new(StoredRecord::new(id, record, key, cost)));
        }
        info!(
            backend = backend.name(),
            records = index.live,
            watermark = %index.next_id,
            "record store opened"
        );
        cost_prometheus::set_record_count(index.live);

        Ok(Self {
            backend,
            policy,
            interner,
            writer: tokio::sync::Mutex::new(()),
            index: RwLock::new(index),
            listeners: RwLock::new(Vec::new()),
            leases: Arc::new(LeaseTable::default()),
            closed: AtomicBool::new(false),
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    /// Page size used by scans created through [`RecordStore::scan`].
    pub fn with_scan_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn interner(&self) -> &Arc<Interner> {
        &self.interner
    }

    pub fn policy(&self) -> &IngestPolicy {
        &self.policy
    }

    pub fn backend(&self) -> &Arc<dyn RecordBackend> {
        &self.backend
    }

    /// The id the next append will receive. Every lower id is visible to scans.
    pub fn watermark(&self) -> RecordId {
        self.index.read().next_id
    }

    /// Number of live (not withdrawn) records.
    pub fn len(&self) -> usize {
        self.index.read().live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Withdrawn records not yet purged by compaction.
    pub fn pending_compaction(&self) -> usize {
        self.index.read().withdrawn.len()
    }

    /// Number of scans currently holding a snapshot.
    pub fn active_snapshots(&self) -> usize {
        self.leases.epochs.lock().values().sum()
    }

    /// Registers a listener notified after every successful append.
    ///
    /// The store keeps only a weak reference; dropping the listener unsubscribes it.
    pub fn subscribe(&self, listener: &Arc<dyn AppendListener>) {
        self.listeners.write().push(Arc::downgrade(listener));
    }

    fn ensure_open(&self) -> Result<(), CostError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CostError::storage(std::io::Error::other("record store is closed")));
        }
        Ok(())
    }

    fn prepare(
        &self,
        records: Vec<UsageRecord>,
        now: DateTime<Utc>,
    ) -> Result<Vec<(UsageRecord, DimensionKey, rust_decimal::Decimal)>, CostError> {
        records
            .into_iter()
            .enumerate()
            .map(|(i, record)| match self.policy.check(&record, now) {
                Ok(cost) => {
                    let key = DimensionKey::from_map(&record.dimensions, &self.interner);
                    Ok((record, key, cost))
                }
                Err((reason, err)) => {
                    cost_prometheus::record_rejected(reason);
                    debug!(index = i, reason, error = %err, "record rejected");
                    Err(match err {
                        CostError::Validation(msg) => {
                            CostError::Validation(format!("record {i}: {msg}"))
                        }
                        other => other,
                    })
                }
            })
            .collect()
    }

    fn assign_ids(
        first: RecordId,
        prepared: Vec<(UsageRecord, DimensionKey, rust_decimal::Decimal)>,
    ) -> Vec<Arc<StoredRecord>> {
        let mut id = first;
        prepared
            .into_iter()
            .map(|(record, key, cost)| {
                let stored = Arc::new(StoredRecord::new(id, record, key, cost));
                id = id.next();
                stored
            })
            .collect()
    }

    fn notify(&self, appended: &[Arc<StoredRecord>]) {
        let listeners: Vec<Arc<dyn AppendListener>> = {
            let mut guard = self.listeners.write();
            guard.retain(|l| l.strong_count() > 0);
            guard.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in &listeners {
            for record in appended {
                listener.on_append(record);
            }
        }
    }

    /// Validates, persists, and publishes one record.
    pub async fn append(&self, record: UsageRecord) -> Result<RecordId, CostError> {
        let ids = self.append_batch(vec![record]).await?;
        ids.into_iter()
            .next()
            .ok_or_else(|| CostError::Internal("append produced no id".into()))
    }

    /// Validates, persists, and publishes a batch. Either every record is
    /// accepted or none is; ids are consecutive in input order.
    pub async fn append_batch(&self, records: Vec<UsageRecord>) -> Result<Vec<RecordId>, CostError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let prepared = self.prepare(records, Utc::now())?;

        let _writer = self.writer.lock().await;
        self.ensure_open()?;
        let stored = Self::assign_ids(self.watermark(), prepared);
        self.backend.commit(WriteBatch::append(stored.clone())).await?;

        let live = {
            let mut index = self.index.write();
            for record in &stored {
                index.insert(Arc::clone(record));
            }
            if let Some(last) = stored.last() {
                index.next_id = last.id.next();
            }
            index.live
        };
        self.notify(&stored);

        cost_prometheus::record_appended(stored.len());
        cost_prometheus::set_record_count(live);
        debug!(count = stored.len(), first_id = %stored[0].id, "records appended");
        Ok(stored.iter().map(|r| r.id).collect())
    }

    /// Withdraws the live records in `(range, filter)` and appends `records`
    /// in their place, as one backend commit.
    ///
    /// Every replacement must fall inside `range` and match `filter`. Scans
    /// started before the call keep seeing the withdrawn records.
    pub async fn replace(
        &self,
        range: &TimeRange,
        filter: &DimensionFilter,
        records: Vec<UsageRecord>,
    ) -> Result<ReplaceOutcome, CostError> {
        if let Some((i, r)) = records
            .iter()
            .enumerate()
            .find(|(_, r)| !range.contains(r.timestamp) || !filter.matches_map(&r.dimensions))
        {
            return Err(CostError::Validation(format!(
                "replacement record {i} at {} falls outside {range} or the replace filter",
                r.timestamp
            )));
        }
        let prepared = self.prepare(records, Utc::now())?;

        let _writer = self.writer.lock().await;
        self.ensure_open()?;
        let withdrawn = self.index.read().active_in(range, filter);
        let stored = Self::assign_ids(self.watermark(), prepared);
        self.backend
            .commit(WriteBatch {
                appended: stored.clone(),
                removed: withdrawn.iter().map(|r| r.id).collect(),
            })
            .await?;

        let live = {
            let mut index = self.index.write();
            index.withdraw(&withdrawn);
            for record in &stored {
                index.insert(Arc::clone(record));
            }
            if let Some(last) = stored.last() {
                index.next_id = last.id.next();
            }
            index.live
        };
        self.notify(&stored);

        let touched = withdrawn
            .iter()
            .chain(stored.iter())
            .map(|r| r.timestamp())
            .fold(None::<(DateTime<Utc>, DateTime<Utc>)>, |acc, ts| match acc {
                None => Some((ts, ts)),
                Some((lo, hi)) => Some((lo.min(ts), hi.max(ts))),
            })
            .and_then(|(lo, hi)| TimeRange::new(lo, hi + Duration::nanoseconds(1)).ok());

        cost_prometheus::record_appended(stored.len());
        cost_prometheus::set_record_count(live);
        info!(
            range = %range,
            withdrawn = withdrawn.len(),
            appended = stored.len(),
            "records replaced"
        );
        Ok(ReplaceOutcome {
            withdrawn: withdrawn.len(),
            appended: stored.iter().map(|r| r.id).collect(),
            touched,
        })
    }

    /// Removes every live record older than `cutoff` and compacts.
    pub async fn retention_sweep(&self, cutoff: DateTime<Utc>) -> Result<usize, CostError> {
        let _writer = self.writer.lock().await;
        self.ensure_open()?;
        let expired: Vec<Arc<StoredRecord>> = {
            let index = self.index.read();
            index
                .records
                .range(..(cutoff, RecordId(0)))
                .map(|(_, r)| r)
                .filter(|r| r.is_active())
                .cloned()
                .collect()
        };
        if expired.is_empty() {
            return Ok(0);
        }
        self.backend
            .commit(WriteBatch::remove(expired.iter().map(|r| r.id).collect()))
            .await?;
        let live = {
            let mut index = self.index.write();
            index.withdraw(&expired);
            index.live
        };
        let purged = self.compact();

        cost_prometheus::record_retention_sweep(expired.len());
        cost_prometheus::set_record_count(live);
        info!(cutoff = %cutoff, removed = expired.len(), purged, "retention sweep complete");
        Ok(expired.len())
    }

    /// Physically drops withdrawn records that no live snapshot can observe.
    /// Returns how many were purged.
    pub fn compact(&self) -> usize {
        let mut index = self.index.write();
        let horizon = self.leases.min_epoch();
        let (purge, keep): (Vec<_>, Vec<_>) = std::mem::take(&mut index.withdrawn)
            .into_iter()
            .partition(|r| match (horizon, r.withdrawn_epoch()) {
                (None, _) => true,
                (Some(min), Some(epoch)) => epoch <= min,
                (Some(_), None) => false,
            });
        index.withdrawn = keep;
        for record in &purge {
            index.records.remove(&(record.timestamp(), record.id));
        }
        if !purge.is_empty() {
            debug!(purged = purge.len(), pending = index.withdrawn.len(), "index compacted");
        }
        purge.len()
    }

    /// Lazy scan over `(range, filter)` pinned to the current snapshot.
    pub fn scan(self: &Arc<Self>, range: TimeRange, filter: DimensionFilter) -> Scan {
        let source: Arc<dyn RecordSource> = Arc::clone(self) as Arc<dyn RecordSource>;
        Scan::new(source, range, filter, self.page_size)
    }

    /// Rejects further writes and scans, then shuts the backend down.
    pub async fn close(&self) -> Result<(), CostError> {
        let _writer = self.writer.lock().await;
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Err(e) = self.backend.shutdown().await {
            warn!(error = %e, "record backend shutdown failed");
            return Err(e);
        }
        info!("record store closed");
        Ok(())
    }
}

#[async_trait]
impl RecordSource for RecordStore {
    fn snapshot(&self) -> Snapshot {
        let index = self.index.read();
        *self.leases.epochs.lock().entry(index.epoch).or_insert(0) += 1;
        let lease = Lease {
            table: Arc::clone(&self.leases),
            epoch: index.epoch,
        };
        Snapshot::new(index.next_id, index.epoch).with_lease(Arc::new(lease))
    }

    fn time_bounds(&self) -> Option<TimeRange> {
        let index = self.index.read();
        let first = index.records.values().find(|r| r.is_active())?;
        let last = index.records.values().rev().find(|r| r.is_active())?;
        TimeRange::new(first.timestamp(), last.timestamp() + Duration::nanoseconds(1)).ok()
    }

    async fn scan_page(
        &self,
        snapshot: &Snapshot,
        range: &TimeRange,
        filter: &DimensionFilter,
        after: Option<ScanCursor>,
        limit: usize,
    ) -> Result<ScanPage, CostError> {
        self.ensure_open()?;
        let limit = limit.max(1);
        let lower = match after {
            Some(cursor) => Bound::Excluded((cursor.timestamp, cursor.id)),
            None => Bound::Included((range.start, RecordId(0))),
        };
        let upper = Bound::Excluded((range.end, RecordId(0)));

        let index = self.index.read();
        let mut records = Vec::new();
        let mut examined = 0;
        let mut last = None;
        for ((ts, id), record) in index.records.range((lower, upper)) {
            examined += 1;
            last = Some(ScanCursor {
                timestamp: *ts,
                id: *id,
            });
            if snapshot.includes(record) && filter.matches(&record.key) {
                records.push(Arc::clone(record));
            }
            if examined == limit {
                break;
            }
        }
        let next = if examined == limit { last } else { None };
        Ok(ScanPage { records, next })
    }
}
