// SPDX-FileCopyrightText: 2026 Cost Explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Incrementally maintained aggregate cells over the record store.
//!
//! Every cell lives behind its own mutex in a sharded arena, so increments
//! for different `(bucket, key)` pairs never contend. A recompute registers
//! itself before taking its snapshot; from then on every increment applied
//! to a cell in its scope is also written to the rebuild log, and the swap
//! replays the entries at or above the snapshot watermark.
//!
//! Lock order: arena shard, then cell, then rebuild list, then rebuild log.
//! The mark list is only ever read while a cell is held.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cost_config::model::AggregationConfig;
use cost_core::{
    AppendListener, CostError, DimensionFilter, DimensionKey, Granularity, RecordId, RecordSource,
    Scan, StoredRecord, TimeBucket, TimeRange,
};

use crate::cell::{CellId, CellSnapshot, CellState, IncrementOutcome};
use crate::marks::InvalidationMark;

type CellHandle = Arc<Mutex<CellState>>;

/// Tunables for the aggregation engine.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Width of every cell's time bucket. Must be fixed-width.
    pub base: Granularity,
    pub dedup_window: usize,
    pub page_size: usize,
}

impl EngineOptions {
    pub fn from_config(config: &AggregationConfig) -> Self {
        Self {
            base: config.base_granularity,
            dedup_window: config.dedup_window.max(1),
            page_size: config.scan_page_size.max(1),
        }
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::from_config(&AggregationConfig::default())
    }
}

/// Summary of a completed recompute.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecomputeReport {
    /// The bucket-aligned range rebuilt.
    pub range: TimeRange,
    pub filter: DimensionFilter,
    /// Records with ids below this were read from the store.
    pub watermark: RecordId,
    pub records_scanned: u64,
    pub cells_written: usize,
    pub cells_retired: usize,
    pub marks_cleared: usize,
    pub elapsed_ms: u64,
}

/// Point-in-time counters describing the arena.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub cells: usize,
    pub stale_cells: usize,
    pub keys: usize,
    pub marks: usize,
    pub active_rebuilds: usize,
    pub fully_hydrated: bool,
}

/// A recompute in flight.
struct ActiveRebuild {
    range: TimeRange,
    filter: DimensionFilter,
    log: Mutex<HashMap<CellId, Vec<(RecordId, Decimal)>>>,
}

impl ActiveRebuild {
    fn covers(&self, id: &CellId) -> bool {
        self.range.contains(id.bucket_start) && self.filter.matches(&id.key)
    }
}

/// Unregisters a rebuild however the recompute exits.
struct RebuildGuard<'a> {
    rebuilds: &'a RwLock<Vec<Arc<ActiveRebuild>>>,
    rebuild: Arc<ActiveRebuild>,
}

impl Drop for RebuildGuard<'_> {
    fn drop(&mut self) {
        self.rebuilds
            .write()
            .retain(|r| !Arc::ptr_eq(r, &self.rebuild));
    }
}

#[derive(Default, Clone, Copy)]
struct Fresh {
    sum: Decimal,
    count: u64,
    last: Option<RecordId>,
}

/// The cell arena plus the invalidation and rebuild bookkeeping around it.
pub struct AggregationEngine {
    source: Arc<dyn RecordSource>,
    options: EngineOptions,
    cells: DashMap<CellId, CellHandle>,
    /// Live cells per dimension key.
    keys: DashMap<DimensionKey, usize>,
    marks: RwLock<Vec<InvalidationMark>>,
    next_mark: AtomicU64,
    rebuilds: RwLock<Vec<Arc<ActiveRebuild>>>,
    /// Sorted, disjoint ranges rebuilt for every key.
    coverage: RwLock<Vec<TimeRange>>,
    fully_hydrated: AtomicBool,
}

impl AggregationEngine {
    pub fn new(source: Arc<dyn RecordSource>, options: EngineOptions) -> Self {
        Self {
            source,
            options,
            cells: DashMap::new(),
            keys: DashMap::new(),
            marks: RwLock::new(Vec::new()),
            next_mark: AtomicU64::new(1),
            rebuilds: RwLock::new(Vec::new()),
            coverage: RwLock::new(Vec::new()),
            fully_hydrated: AtomicBool::new(false),
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn base_granularity(&self) -> Granularity {
        self.options.base
    }

    pub fn source(&self) -> &Arc<dyn RecordSource> {
        &self.source
    }

    fn cell_id(&self, record: &StoredRecord) -> CellId {
        CellId::new(self.options.base.truncate(record.timestamp()), record.key.clone())
    }

    fn existing(&self, id: &CellId) -> Option<CellHandle> {
        self.cells.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Returns the cell for `id`, creating it (stale if an outstanding mark covers it).
    fn cell_handle(&self, id: &CellId) -> CellHandle {
        if let Some(handle) = self.existing(id) {
            return handle;
        }
        match self.cells.entry(id.clone()) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                let stale = self.is_marked(id, None);
                let handle = Arc::new(Mutex::new(CellState::new(stale)));
                entry.insert(Arc::clone(&handle));
                *self.keys.entry(id.key.clone()).or_insert(0) += 1;
                handle
            }
        }
    }

    /// Removes a retired cell from the arena if it is still the one mapped to `id`.
    fn evict(&self, id: &CellId, handle: &CellHandle) -> bool {
        let removed = self
            .cells
            .remove_if(id, |_, current| Arc::ptr_eq(current, handle))
            .is_some();
        if removed {
            let empty = match self.keys.get_mut(&id.key) {
                Some(mut count) => {
                    *count = count.saturating_sub(1);
                    *count == 0
                }
                None => false,
            };
            if empty {
                self.keys.remove_if(&id.key, |_, count| *count == 0);
            }
        }
        removed
    }

    fn is_marked(&self, id: &CellId, ignoring: Option<&HashSet<u64>>) -> bool {
        self.marks.read().iter().any(|mark| {
            ignoring.is_none_or(|ids| !ids.contains(&mark.id))
                && mark.covers_cell(id.bucket_start, &id.key)
        })
    }

    /// Folds one stored record into its cell.
    ///
    /// Safe to call more than once per record: repeats are detected by the
    /// cell's recent-id window and rebuild floor.
    pub fn apply_increment(&self, record: &StoredRecord) -> IncrementOutcome {
        let id = self.cell_id(record);
        let outcome = loop {
            let handle = self.cell_handle(&id);
            let mut cell = handle.lock();
            if cell.retired {
                drop(cell);
                self.evict(&id, &handle);
                continue;
            }
            let outcome = cell.apply(record.id, record.cost, self.options.dedup_window);
            if outcome == IncrementOutcome::Applied {
                for rebuild in self.rebuilds.read().iter().filter(|r| r.covers(&id)) {
                    rebuild
                        .log
                        .lock()
                        .entry(id.clone())
                        .or_default()
                        .push((record.id, record.cost));
                }
            }
            break outcome;
        };
        match outcome {
            IncrementOutcome::Applied => {}
            IncrementOutcome::Overflowed => warn!(
                record_id = %record.id,
                bucket = %id.bucket_start,
                "cell sum overflowed, cell marked stale"
            ),
            _ => debug!(record_id = %record.id, outcome = outcome.label(), "increment skipped"),
        }
        cost_prometheus::record_increment(outcome.label());
        outcome
    }

    /// Marks every cell in `(range, filter)` stale until a covering recompute completes.
    pub fn invalidate(&self, range: &TimeRange, filter: &DimensionFilter) -> InvalidationMark {
        let mark = InvalidationMark {
            id: self.next_mark.fetch_add(1, Ordering::SeqCst),
            range: range.align(self.options.base),
            filter: filter.clone(),
            created_at: Utc::now(),
        };
        self.marks.write().push(mark.clone());

        let affected: Vec<CellHandle> = self
            .cells
            .iter()
            .filter(|entry| mark.covers_cell(entry.key().bucket_start, &entry.key().key))
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for handle in &affected {
            handle.lock().stale = true;
        }
        info!(
            mark_id = mark.id,
            range = %mark.range,
            cells = affected.len(),
            "cells invalidated"
        );
        mark
    }

    /// Rebuilds every cell in `(range, filter)` from the record store.
    ///
    /// On error or cancellation no cell is modified and every mark stays.
    pub async fn recompute(
        &self,
        range: &TimeRange,
        filter: &DimensionFilter,
        cancel: &CancellationToken,
    ) -> Result<RecomputeReport, CostError> {
        let started = Instant::now();
        let range = range.align(self.options.base);
        let horizon = self.next_mark.load(Ordering::SeqCst);

        let rebuild = Arc::new(ActiveRebuild {
            range,
            filter: filter.clone(),
            log: Mutex::new(HashMap::new()),
        });
        self.rebuilds.write().push(Arc::clone(&rebuild));
        let _guard = RebuildGuard {
            rebuilds: &self.rebuilds,
            rebuild: Arc::clone(&rebuild),
        };

        let scan = Scan::new(
            Arc::clone(&self.source),
            range,
            filter.clone(),
            self.options.page_size,
        );
        let watermark = scan.snapshot().watermark;
        let (fresh, scanned) = match self.scan_fresh(scan, cancel).await {
            Ok(result) => result,
            Err(e) => {
                let outcome = if matches!(e, CostError::Cancelled) {
                    "cancelled"
                } else {
                    "failed"
                };
                warn!(range = %range, error = %e, outcome, "recompute aborted, cells left unchanged");
                cost_prometheus::record_recompute(outcome, started.elapsed());
                return Err(e);
            }
        };

        let cleared: HashSet<u64> = self
            .marks
            .read()
            .iter()
            .filter(|m| m.id < horizon && m.cleared_by(&range, filter))
            .map(|m| m.id)
            .collect();

        let mut targets: BTreeSet<CellId> = fresh.keys().cloned().collect();
        targets.extend(rebuild.log.lock().keys().cloned());
        targets.extend(
            self.cells
                .iter()
                .filter(|entry| rebuild.covers(entry.key()))
                .map(|entry| entry.key().clone()),
        );

        let (mut written, mut retired) = (0usize, 0usize);
        for id in &targets {
            let fresh = fresh.get(id).copied();
            loop {
                let handle = match (fresh, self.existing(id)) {
                    (_, Some(handle)) => handle,
                    (Some(_), None) => self.cell_handle(id),
                    (None, None) => break,
                };
                let mut cell = handle.lock();
                if cell.retired {
                    drop(cell);
                    self.evict(id, &handle);
                    continue;
                }
                if cell.floor > watermark {
                    // A later rebuild already swapped this cell.
                    break;
                }
                let logged = rebuild.log.lock().remove(id).unwrap_or_default();
                let base = fresh.unwrap_or_default();
                let (mut sum, mut count, mut last) = (base.sum, base.count, base.last);
                let mut recent = BTreeSet::new();
                let mut overflowed = false;
                for (record_id, cost) in logged.into_iter().filter(|(rid, _)| *rid >= watermark) {
                    if recent.insert(record_id) {
                        let Some(next) = sum.checked_add(cost) else {
                            overflowed = true;
                            break;
                        };
                        sum = next;
                        count += 1;
                        last = last.max(Some(record_id));
                    }
                }
                if overflowed {
                    cell.stale = true;
                    warn!(bucket = %id.bucket_start, "replayed cell sum overflowed, cell left stale");
                    break;
                }
                while recent.len() > self.options.dedup_window {
                    recent.pop_first();
                }
                cell.sum_cost = sum;
                cell.record_count = count;
                cell.last_updated = last;
                cell.recent = recent;
                cell.floor = watermark;
                cell.stale = self.is_marked(id, Some(&cleared));
                let empty = count == 0;
                cell.retired = empty;
                drop(cell);
                if empty {
                    self.evict(id, &handle);
                    retired += 1;
                } else {
                    written += 1;
                }
                break;
            }
        }

        self.marks.write().retain(|m| !cleared.contains(&m.id));

        // Cells created after the targets were collected only hold logged
        // increments, so only their staleness needs refreshing.
        let late: Vec<CellId> = rebuild
            .log
            .lock()
            .keys()
            .filter(|id| !targets.contains(*id))
            .cloned()
            .collect();
        for id in &late {
            if let Some(handle) = self.existing(id) {
                let mut cell = handle.lock();
                if !cell.retired {
                    cell.stale = self.is_marked(id, None);
                }
            }
        }

        if filter.is_empty() {
            self.add_coverage(range);
        }

        let report = RecomputeReport {
            range,
            filter: filter.clone(),
            watermark,
            records_scanned: scanned,
            cells_written: written,
            cells_retired: retired,
            marks_cleared: cleared.len(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            range = %range,
            watermark = %watermark,
            records = scanned,
            cells_written = written,
            cells_retired = retired,
            marks_cleared = cleared.len(),
            "recompute complete"
        );
        cost_prometheus::record_recompute("completed", started.elapsed());
        self.publish_gauges();
        Ok(report)
    }

    async fn scan_fresh(
        &self,
        mut scan: Scan,
        cancel: &CancellationToken,
    ) -> Result<(HashMap<CellId, Fresh>, u64), CostError> {
        let range = *scan.range();
        let mut fresh: HashMap<CellId, Fresh> = HashMap::new();
        let mut scanned = 0u64;
        loop {
            let page = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(CostError::Cancelled),
                page = scan.next_page() => page
                    .map_err(|e| CostError::recompute(format!("scan of {range} failed"), e))?,
            };
            let Some(page) = page else { break };
            for record in &page {
                let id = self.cell_id(record);
                let entry = fresh.entry(id).or_default();
                entry.sum = entry.sum.checked_add(record.cost).ok_or_else(|| {
                    CostError::Overflow(format!("cost sum of a cell in {range}"))
                })?;
                entry.count += 1;
                entry.last = entry.last.max(Some(record.id));
            }
            scanned += page.len() as u64;
            tokio::task::yield_now().await;
        }
        if cancel.is_cancelled() {
            return Err(CostError::Cancelled);
        }
        Ok((fresh, scanned))
    }

    /// Builds the arena from every record in the store.
    pub async fn hydrate(&self, cancel: &CancellationToken) -> Result<RecomputeReport, CostError> {
        let started = Instant::now();
        let bounds = match self.source.time_bounds() {
            Some(bounds) => bounds,
            None => {
                // Nothing stored yet: every later record arrives as an increment.
                let now = Utc::now();
                let bucket = TimeBucket::containing(now, self.options.base);
                self.fully_hydrated.store(true, Ordering::Release);
                info!("hydration skipped, record store is empty");
                return Ok(RecomputeReport {
                    range: bucket.range(),
                    filter: DimensionFilter::all(),
                    watermark: self.source.snapshot().watermark,
                    records_scanned: 0,
                    cells_written: 0,
                    cells_retired: 0,
                    marks_cleared: 0,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                });
            }
        };
        let report = self.recompute(&bounds, &DimensionFilter::all(), cancel).await?;
        self.fully_hydrated.store(true, Ordering::Release);
        info!(cells = self.cell_count(), records = report.records_scanned, "engine hydrated");
        Ok(report)
    }

    pub fn is_fully_hydrated(&self) -> bool {
        self.fully_hydrated.load(Ordering::Acquire)
    }

    /// Drops cells and marks whose buckets end at or before `cutoff`.
    pub fn expire_before(&self, cutoff: DateTime<Utc>) -> usize {
        let base = self.options.base;
        let expired: Vec<(CellId, CellHandle)> = self
            .cells
            .iter()
            .filter(|entry| base.next(entry.key().bucket_start) <= cutoff)
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();
        let mut removed = 0;
        for (id, handle) in &expired {
            handle.lock().retired = true;
            if self.evict(id, handle) {
                removed += 1;
            }
        }
        self.marks.write().retain(|m| m.range.end > cutoff);
        if removed > 0 {
            debug!(cells = removed, cutoff = %cutoff, "expired cells");
        }
        removed
    }

    fn add_coverage(&self, range: TimeRange) {
        let mut coverage = self.coverage.write();
        coverage.push(range);
        coverage.sort_by_key(|r| r.start);
        let mut merged: Vec<TimeRange> = Vec::with_capacity(coverage.len());
        for r in coverage.drain(..) {
            match merged.last_mut() {
                Some(prev) if r.start <= prev.end => prev.end = prev.end.max(r.end),
                _ => merged.push(r),
            }
        }
        *coverage = merged;
    }

    /// Parts of `range` whose cells were never rebuilt for every key.
    ///
    /// Empty once the engine is hydrated.
    pub fn uncovered(&self, range: &TimeRange) -> Vec<TimeRange> {
        if self.is_fully_hydrated() {
            return Vec::new();
        }
        let mut gaps = Vec::new();
        let mut cursor = range.start;
        for covered in self.coverage.read().iter() {
            if covered.end <= cursor {
                continue;
            }
            if covered.start >= range.end {
                break;
            }
            if covered.start > cursor {
                gaps.push(TimeRange {
                    start: cursor,
                    end: covered.start,
                });
            }
            cursor = cursor.max(covered.end);
        }
        if cursor < range.end {
            gaps.push(TimeRange {
                start: cursor,
                end: range.end,
            });
        }
        gaps
    }

    /// `(sum_cost, record_count, stale)` of a live cell.
    pub(crate) fn read(&self, id: &CellId) -> Option<(Decimal, u64, bool)> {
        let handle = self.existing(id)?;
        let cell = handle.lock();
        (!cell.retired).then_some((cell.sum_cost, cell.record_count, cell.stale))
    }

    /// Looks up the cell whose bucket contains `ts`.
    pub fn cell(&self, ts: DateTime<Utc>, key: &DimensionKey) -> Option<CellSnapshot> {
        let bucket = TimeBucket::containing(ts, self.options.base);
        let handle = self.existing(&CellId::new(bucket.start, key.clone()))?;
        let cell = handle.lock();
        if cell.retired {
            return None;
        }
        Some(CellSnapshot {
            bucket,
            key: key.clone(),
            sum_cost: cell.sum_cost,
            record_count: cell.record_count,
            last_updated_record_id: cell.last_updated,
            stale: cell.stale,
        })
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Outstanding invalidation marks, oldest first.
    pub fn marks(&self) -> Vec<InvalidationMark> {
        self.marks.read().clone()
    }

    /// Every key with at least one live cell, sorted.
    pub fn dimension_keys(&self) -> Vec<DimensionKey> {
        let mut keys: Vec<DimensionKey> = self.keys.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn keys_matching(&self, filter: &DimensionFilter) -> Vec<DimensionKey> {
        let mut keys: Vec<DimensionKey> = self
            .keys
            .iter()
            .filter(|e| filter.matches(e.key()))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn stats(&self) -> EngineStats {
        let handles: Vec<CellHandle> = self.cells.iter().map(|e| Arc::clone(e.value())).collect();
        let stale_cells = handles.iter().filter(|h| h.lock().stale).count();
        EngineStats {
            cells: handles.len(),
            stale_cells,
            keys: self.keys.len(),
            marks: self.marks.read().len(),
            active_rebuilds: self.rebuilds.read().len(),
            fully_hydrated: self.is_fully_hydrated(),
        }
    }

    pub fn publish_gauges(&self) {
        let stats = self.stats();
        cost_prometheus::set_cell_count(stats.cells);
        cost_prometheus::set_stale_cells(stats.stale_cells);
        cost_prometheus::set_open_marks(stats.marks);
    }
}

impl AppendListener for AggregationEngine {
    fn on_append(&self, record: &Arc<StoredRecord>) {
        self.apply_increment(record);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::TimeZone;
    use cost_core::UsageRecord;
    use cost_storage::{IngestPolicy, MemoryBackend, RecordStore};

    use super::*;

    fn ts(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0).unwrap()
    }

    fn usage(day: u32, hour: u32, service: &str, unit_cost: f64) -> UsageRecord {
        UsageRecord {
            timestamp: ts(day, hour) + chrono::Duration::minutes(20),
            dimensions: BTreeMap::from([("service".to_string(), service.to_string())]),
            quantity: 1.0,
            unit_cost,
            currency: "USD".to_string(),
        }
    }

    fn compute() -> DimensionKey {
        DimensionKey::from_pairs([("service", "compute")])
    }

    fn range(from: (u32, u32), to: (u32, u32)) -> TimeRange {
        TimeRange::new(ts(from.0, from.1), ts(to.0, to.1)).unwrap()
    }

    async fn wired() -> (Arc<RecordStore>, Arc<AggregationEngine>) {
        let store = Arc::new(
            RecordStore::open(IngestPolicy::new("USD"), Arc::new(MemoryBackend::new()))
                .await
                .unwrap(),
        );
        let engine = Arc::new(AggregationEngine::new(
            Arc::clone(&store) as Arc<dyn RecordSource>,
            EngineOptions::default(),
        ));
        let listener: Arc<dyn AppendListener> = Arc::clone(&engine) as Arc<dyn AppendListener>;
        store.subscribe(&listener);
        (store, engine)
    }

    #[tokio::test]
    async fn three_records_in_one_hour_sum_exactly() {
        let (store, engine) = wired().await;
        store
            .append_batch(vec![
                usage(4, 9, "compute", 1.0),
                usage(4, 9, "compute", 2.5),
                usage(4, 9, "compute", 0.75),
            ])
            .await
            .unwrap();

        let cell = engine.cell(ts(4, 9), &compute()).unwrap();
        assert_eq!(cell.sum_cost, Decimal::new(425, 2));
        assert_eq!(cell.record_count, 3);
        assert_eq!(cell.last_updated_record_id, Some(RecordId(3)));
        assert!(!cell.stale);
    }

    #[tokio::test]
    async fn replayed_increment_is_ignored() {
        let (store, engine) = wired().await;
        let id = store.append(usage(4, 9, "compute", 2.0)).await.unwrap();
        let record = store
            .scan(range((4, 0), (5, 0)), DimensionFilter::all())
            .collect()
            .await
            .unwrap()
            .into_iter()
            .find(|r| r.id == id)
            .unwrap();

        assert_eq!(engine.apply_increment(&record), IncrementOutcome::Duplicate);
        assert_eq!(engine.cell(ts(4, 9), &compute()).unwrap().sum_cost, Decimal::new(2, 0));
    }

    #[tokio::test]
    async fn cell_sum_past_decimal_range_goes_stale_instead_of_panicking() {
        let store = Arc::new(
            RecordStore::open(
                IngestPolicy::new("USD").with_max_record_cost(Decimal::MAX),
                Arc::new(MemoryBackend::new()),
            )
            .await
            .unwrap(),
        );
        let engine = Arc::new(AggregationEngine::new(
            Arc::clone(&store) as Arc<dyn RecordSource>,
            EngineOptions::default(),
        ));
        let listener: Arc<dyn AppendListener> = Arc::clone(&engine) as Arc<dyn AppendListener>;
        store.subscribe(&listener);

        let huge = UsageRecord {
            quantity: 1e14,
            ..usage(4, 9, "compute", 5e14)
        };
        store.append_batch(vec![huge.clone(), huge]).await.unwrap();

        let cell = engine.cell(ts(4, 9), &compute()).unwrap();
        assert!(cell.stale);
        assert_eq!(cell.record_count, 1);
        let before = cell.sum_cost;

        let result = engine
            .recompute(&range((4, 0), (5, 0)), &DimensionFilter::all(), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(CostError::Overflow(_))));
        let cell = engine.cell(ts(4, 9), &compute()).unwrap();
        assert!(cell.stale);
        assert_eq!(cell.sum_cost, before);
    }

    #[tokio::test]
    async fn invalidate_flags_existing_and_future_cells() {
        let (store, engine) = wired().await;
        store.append(usage(4, 9, "compute", 1.0)).await.unwrap();
        let mark = engine.invalidate(&range((4, 0), (5, 0)), &DimensionFilter::all());
        assert_eq!(mark.range, range((4, 0), (5, 0)));

        store.append(usage(4, 11, "compute", 1.0)).await.unwrap();
        assert!(engine.cell(ts(4, 9), &compute()).unwrap().stale);
        assert!(engine.cell(ts(4, 11), &compute()).unwrap().stale);
        assert_eq!(engine.marks().len(), 1);
    }

    #[tokio::test]
    async fn recompute_clears_covered_marks_and_restores_sums() {
        let (store, engine) = wired().await;
        store
            .append_batch(vec![usage(4, 9, "compute", 1.0), usage(4, 9, "storage", 3.0)])
            .await
            .unwrap();
        engine.invalidate(&range((4, 9), (4, 10)), &DimensionFilter::all());

        let report = engine
            .recompute(&range((4, 0), (5, 0)), &DimensionFilter::all(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.records_scanned, 2);
        assert_eq!(report.cells_written, 2);
        assert_eq!(report.marks_cleared, 1);
        assert!(engine.marks().is_empty());
        let cell = engine.cell(ts(4, 9), &compute()).unwrap();
        assert!(!cell.stale);
        assert_eq!(cell.sum_cost, Decimal::ONE);
    }

    #[tokio::test]
    async fn narrower_recompute_leaves_wider_mark() {
        let (store, engine) = wired().await;
        store.append(usage(4, 9, "compute", 1.0)).await.unwrap();
        engine.invalidate(&range((4, 0), (6, 0)), &DimensionFilter::all());
        engine
            .recompute(&range((4, 0), (5, 0)), &DimensionFilter::all(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(engine.marks().len(), 1);
        assert!(engine.cell(ts(4, 9), &compute()).unwrap().stale);
    }

    #[tokio::test]
    async fn cancelled_recompute_changes_nothing() {
        let (store, engine) = wired().await;
        store.append(usage(4, 9, "compute", 1.0)).await.unwrap();
        engine.invalidate(&range((4, 9), (4, 10)), &DimensionFilter::all());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = engine
            .recompute(&range((4, 0), (5, 0)), &DimensionFilter::all(), &cancel)
            .await;
        assert!(matches!(result, Err(CostError::Cancelled)));
        let cell = engine.cell(ts(4, 9), &compute()).unwrap();
        assert!(cell.stale);
        assert_eq!(cell.sum_cost, Decimal::ONE);
        assert_eq!(engine.marks().len(), 1);
        assert_eq!(engine.stats().active_rebuilds, 0);
    }

    #[tokio::test]
    async fn withdrawn_records_disappear_after_recompute() {
        let (store, engine) = wired().await;
        store.append(usage(4, 9, "compute", 2.0)).await.unwrap();
        let day = range((4, 0), (5, 0));
        store.replace(&day, &DimensionFilter::all(), Vec::new()).await.unwrap();
        assert_eq!(engine.cell(ts(4, 9), &compute()).unwrap().sum_cost, Decimal::new(2, 0));

        let report = engine
            .recompute(&day, &DimensionFilter::all(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.cells_retired, 1);
        assert!(engine.cell(ts(4, 9), &compute()).is_none());
        assert!(engine.dimension_keys().is_empty());
    }

    #[tokio::test]
    async fn hydrate_builds_cells_for_existing_records() {
        let store = Arc::new(
            RecordStore::open(IngestPolicy::new("USD"), Arc::new(MemoryBackend::new()))
                .await
                .unwrap(),
        );
        store
            .append_batch(vec![usage(1, 0, "compute", 1.0), usage(3, 5, "compute", 2.0)])
            .await
            .unwrap();
        let engine = AggregationEngine::new(
            Arc::clone(&store) as Arc<dyn RecordSource>,
            EngineOptions::default(),
        );
        assert!(!engine.uncovered(&range((1, 0), (4, 0))).is_empty());

        engine.hydrate(&CancellationToken::new()).await.unwrap();
        assert!(engine.is_fully_hydrated());
        assert_eq!(engine.cell_count(), 2);
        assert!(engine.uncovered(&range((1, 0), (4, 0))).is_empty());
    }

    #[tokio::test]
    async fn coverage_tracks_unfiltered_recomputes() {
        let (_store, engine) = wired().await;
        engine
            .recompute(&range((2, 0), (3, 0)), &DimensionFilter::all(), &CancellationToken::new())
            .await
            .unwrap();
        engine
            .recompute(
                &range((5, 0), (6, 0)),
                &DimensionFilter::all().with("service", ["compute"]),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(
            engine.uncovered(&range((1, 0), (4, 0))),
            vec![range((1, 0), (2, 0)), range((3, 0), (4, 0))]
        );
    }

    #[tokio::test]
    async fn expire_drops_old_cells_and_marks() {
        let (store, engine) = wired().await;
        store
            .append_batch(vec![usage(1, 0, "compute", 1.0), usage(3, 0, "compute", 1.0)])
            .await
            .unwrap();
        engine.invalidate(&range((1, 0), (2, 0)), &DimensionFilter::all());

        assert_eq!(engine.expire_before(ts(2, 0)), 1);
        assert!(engine.cell(ts(1, 0), &compute()).is_none());
        assert!(engine.cell(ts(3, 0), &compute()).is_some());
        assert!(engine.marks().is_empty());
    }

    #[tokio::test]
    async fn keys_matching_applies_filter() {
        let (store, engine) = wired().await;
        store
            .append_batch(vec![usage(1, 0, "compute", 1.0), usage(1, 0, "storage", 1.0)])
            .await
            .unwrap();
        let filter = DimensionFilter::all().with("service", ["storage"]);
        assert_eq!(
            engine.keys_matching(&filter),
            vec![DimensionKey::from_pairs([("service", "storage")])]
        );
        assert_eq!(engine.stats().keys, 2);
    }
}
