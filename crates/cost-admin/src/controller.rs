// SPDX-FileCopyrightText: 2026 Cost Explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The admin capability object.
//!
//! Every operation takes a range lock over its `(range, filter)` first, so
//! overlapping admin work fails fast with `ConcurrencyConflict` while
//! disjoint work runs in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use parking_lot::RwLock;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use cost_config::model::AdminConfig;
use cost_core::{CostError, DimensionFilter, RecordId, ReimportSource, TimeRange};
use cost_engine::{AggregationEngine, InvalidationMark, RecomputeReport, StaleCellHook};
use cost_storage::RecordStore;

use crate::locks::{RangeLockGuard, RangeLockTable};
use crate::operations::{AdminOperation, OperationKind, OperationRegistry};
use crate::retry::{RetryPolicy, with_retry};
use crate::source::{JsonLinesSource, ReimportWindow};

/// Result of [`AdminController::trigger_reimport`].
#[derive(Debug, Clone, Serialize)]
pub struct ReimportReport {
    pub operation: Uuid,
    pub source: String,
    pub range: TimeRange,
    pub fetched: usize,
    /// Records the source returned outside `range`; never stored.
    pub skipped: usize,
    pub withdrawn: usize,
    pub appended: Vec<RecordId>,
    /// Background recompute scheduled over the reimported range.
    pub recompute: Uuid,
}

/// State shared with background recompute tasks.
struct Shared {
    engine: Arc<AggregationEngine>,
    locks: RangeLockTable,
    ops: OperationRegistry,
    retry: RetryPolicy,
    shutdown: CancellationToken,
}

/// Forced invalidation, recomputation and reimport.
pub struct AdminController {
    store: Arc<RecordStore>,
    shared: Arc<Shared>,
    sources: RwLock<HashMap<String, Arc<dyn ReimportSource>>>,
    recompute_stale_on_read: bool,
    tracker: TaskTracker,
}

impl AdminController {
    pub fn new(
        store: Arc<RecordStore>,
        engine: Arc<AggregationEngine>,
        config: &AdminConfig,
    ) -> Self {
        let sources = config
            .sources
            .iter()
            .map(|s| {
                let source: Arc<dyn ReimportSource> =
                    Arc::new(JsonLinesSource::new(s.name.clone(), s.path.clone()));
                (s.name.clone(), source)
            })
            .collect();
        Self {
            store,
            shared: Arc::new(Shared {
                engine,
                locks: RangeLockTable::new(),
                ops: OperationRegistry::new(config.operation_history),
                retry: RetryPolicy::from_config(&config.retry),
                shutdown: CancellationToken::new(),
            }),
            sources: RwLock::new(sources),
            recompute_stale_on_read: config.recompute_stale_on_read,
            tracker: TaskTracker::new(),
        }
    }

    /// Replaces the retry policy used by later operations.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.retry = retry;
        }
        self
    }

    /// Registers (or replaces) a named reimport source.
    pub fn register_source(&self, source: Arc<dyn ReimportSource>) {
        let name = source.name().to_string();
        debug!(source = %name, "reimport source registered");
        self.sources.write().insert(name, source);
    }

    pub fn source_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sources.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn engine(&self) -> &Arc<AggregationEngine> {
        &self.shared.engine
    }

    /// Marks `(range, filter)` stale.
    pub fn force_invalidate(
        &self,
        range: &TimeRange,
        filter: &DimensionFilter,
    ) -> Result<InvalidationMark, CostError> {
        let _lock = self.shared.lock_aligned(range, filter)?;
        let ops = &self.shared.ops;
        let op = ops.create(OperationKind::Invalidate, *range, filter.clone());
        ops.start(op.id)?;
        let mark = self.shared.engine.invalidate(range, filter);
        ops.complete(op.id, serde_json::to_value(&mark).ok())?;
        info!(operation = %op.id, range = %mark.range, mark = mark.id, "forced invalidation");
        Ok(mark)
    }

    /// Rebuilds `(range, filter)` before returning.
    pub async fn force_recompute(
        &self,
        range: &TimeRange,
        filter: &DimensionFilter,
    ) -> Result<RecomputeReport, CostError> {
        let _lock = self.shared.lock_aligned(range, filter)?;
        let ops = &self.shared.ops;
        let op = ops.create(OperationKind::Recompute, *range, filter.clone());
        ops.start(op.id)?;
        let cancel = self.shared.shutdown.child_token();
        match self.shared.engine.recompute(range, filter, &cancel).await {
            Ok(report) => {
                ops.complete(op.id, serde_json::to_value(&report).ok())?;
                info!(
                    operation = %op.id,
                    range = %report.range,
                    cells_written = report.cells_written,
                    "forced recompute completed"
                );
                Ok(report)
            }
            Err(e) => {
                ops.fail(op.id, &e)?;
                warn!(operation = %op.id, range = %range, error = %e, "forced recompute failed");
                Err(e)
            }
        }
    }

    /// Pulls `window` from the named source and replaces the stored records
    /// in that range, then schedules a recompute over it.
    pub async fn trigger_reimport(
        &self,
        source: &str,
        window: ReimportWindow,
        today: NaiveDate,
    ) -> Result<ReimportReport, CostError> {
        let reimport = self
            .sources
            .read()
            .get(source)
            .cloned()
            .ok_or_else(|| CostError::NotFound {
                kind: "reimport source",
                name: source.to_string(),
            })?;
        let range = window.resolve(today)?;
        let filter = DimensionFilter::all();

        let lock = self.shared.lock_aligned(&range, &filter)?;
        let ops = &self.shared.ops;
        let op = ops.create(OperationKind::Reimport, range, filter.clone());
        ops.start(op.id)?;

        let result = self.reimport_locked(&*reimport, &range, &filter).await;
        drop(lock);

        let (fetched, skipped, outcome) = match result {
            Ok(done) => done,
            Err(e) => {
                ops.fail(op.id, &e)?;
                warn!(operation = %op.id, source, range = %range, error = %e, "reimport failed");
                return Err(e);
            }
        };

        let recompute = self.schedule_recompute(&range, &filter);
        let report = ReimportReport {
            operation: op.id,
            source: source.to_string(),
            range,
            fetched,
            skipped,
            withdrawn: outcome.withdrawn,
            appended: outcome.appended,
            recompute: recompute.id,
        };
        ops.complete(op.id, serde_json::to_value(&report).ok())?;
        info!(
            operation = %op.id,
            source,
            range = %range,
            withdrawn = report.withdrawn,
            appended = report.appended.len(),
            "reimport completed"
        );
        Ok(report)
    }

    async fn reimport_locked(
        &self,
        source: &dyn ReimportSource,
        range: &TimeRange,
        filter: &DimensionFilter,
    ) -> Result<(usize, usize, cost_storage::ReplaceOutcome), CostError> {
        let records = with_retry(
            &self.shared.retry,
            "reimport_fetch",
            &self.shared.shutdown,
            |_| source.fetch(range),
        )
        .await?;
        let fetched = records.len();
        let records: Vec<_> = records
            .into_iter()
            .filter(|r| range.contains(r.timestamp))
            .collect();
        let skipped = fetched - records.len();
        if skipped > 0 {
            warn!(source = source.name(), skipped, range = %range, "source returned records outside the range");
        }

        self.shared.engine.invalidate(range, filter);
        let outcome = self.store.replace(range, filter, records).await?;
        if let Some(touched) = outcome.touched {
            if !range.covers(&touched) {
                self.shared.engine.invalidate(&touched, filter);
            }
        }
        Ok((fetched, skipped, outcome))
    }

    /// Queues a background recompute of `(range, filter)`.
    ///
    /// Lock conflicts and retryable failures back off and try again; the
    /// operation only reports `Failed` once the retry budget is spent.
    pub fn schedule_recompute(&self, range: &TimeRange, filter: &DimensionFilter) -> AdminOperation {
        let op = self
            .shared
            .ops
            .create(OperationKind::ScheduledRecompute, *range, filter.clone());
        let shared = Arc::clone(&self.shared);
        let (id, range, filter) = (op.id, *range, filter.clone());
        self.tracker
            .spawn(async move { shared.run_scheduled(id, range, filter).await });
        debug!(operation = %op.id, range = %range, "recompute scheduled");
        op
    }

    pub fn operations(&self) -> Vec<AdminOperation> {
        self.shared.ops.list()
    }

    pub fn operation(&self, id: Uuid) -> Result<AdminOperation, CostError> {
        self.shared.ops.get(id).ok_or_else(|| CostError::NotFound {
            kind: "operation",
            name: id.to_string(),
        })
    }

    pub fn marks(&self) -> Vec<InvalidationMark> {
        self.shared.engine.marks()
    }

    /// Cancels background work and waits for it to stop.
    pub async fn shutdown(&self) {
        self.shared.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        let sources: Vec<_> = self.sources.read().values().cloned().collect();
        for source in sources {
            if let Err(e) = source.shutdown().await {
                warn!(source = source.name(), error = %e, "reimport source shutdown failed");
            }
        }
        info!("admin controller stopped");
    }

    /// Waits until every scheduled recompute has finished.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

impl Shared {
    /// Locks the base buckets `range` touches, since the engine widens every
    /// invalidation and recompute to them.
    fn lock_aligned(
        &self,
        range: &TimeRange,
        filter: &DimensionFilter,
    ) -> Result<RangeLockGuard, CostError> {
        self.locks
            .try_acquire(&range.align(self.engine.base_granularity()), filter)
    }

    async fn run_scheduled(&self, id: Uuid, range: TimeRange, filter: DimensionFilter) {
        let mut attempt = 0;
        loop {
            let mut started = false;
            let result = match self.lock_aligned(&range, &filter) {
                Err(e) => Err(e),
                Ok(_lock) => {
                    if let Err(e) = self.ops.start(id) {
                        error!(operation = %id, error = %e, "scheduled recompute vanished");
                        return;
                    }
                    started = true;
                    self.engine.recompute(&range, &filter, &self.shutdown).await
                }
            };

            let error = match result {
                Ok(report) => {
                    if let Err(e) = self.ops.complete(id, serde_json::to_value(&report).ok()) {
                        warn!(operation = %id, error = %e, "could not mark scheduled recompute completed");
                    }
                    info!(
                        operation = %id,
                        range = %report.range,
                        attempts = attempt + 1,
                        cells_written = report.cells_written,
                        "scheduled recompute completed"
                    );
                    return;
                }
                Err(e) => e,
            };

            let transient =
                error.is_retryable() || matches!(error, CostError::ConcurrencyConflict { .. });
            if !transient || attempt + 1 >= self.retry.max_attempts {
                if let Err(e) = self.ops.fail(id, &error) {
                    warn!(operation = %id, error = %e, "could not mark scheduled recompute failed");
                }
                warn!(
                    operation = %id,
                    range = %range,
                    attempts = attempt + 1,
                    error = %error,
                    "scheduled recompute gave up"
                );
                return;
            }

            if started {
                if let Err(e) = self.ops.requeue(id, &error) {
                    warn!(operation = %id, error = %e, "could not requeue scheduled recompute");
                }
            }
            let delay = self.retry.delay_for_attempt(attempt);
            warn!(
                operation = %id,
                error = %error,
                attempt = attempt + 1,
                max_attempts = self.retry.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "scheduled recompute failed, will retry after delay"
            );
            tokio::select! {
                () = self.shutdown.cancelled() => {
                    if let Err(e) = self.ops.fail(id, &CostError::Cancelled) {
                        warn!(operation = %id, error = %e, "could not mark scheduled recompute cancelled");
                    }
                    return;
                }
                () = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

impl StaleCellHook for AdminController {
    fn stale_cells_read(&self, range: &TimeRange, filter: &DimensionFilter) {
        if !self.recompute_stale_on_read || self.shared.shutdown.is_cancelled() {
            return;
        }
        let ops = &self.shared.ops;
        if ops.in_flight_covering(OperationKind::ScheduledRecompute, range, filter)
            || ops.in_flight_covering(OperationKind::Recompute, range, filter)
        {
            return;
        }
        self.schedule_recompute(range, filter);
    }
}

impl std::fmt::Debug for AdminController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminController")
            .field("sources", &self.source_names())
            .field("locks_held", &self.shared.locks.held())
            .field("recompute_stale_on_read", &self.recompute_stale_on_read)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use cost_config::model::SourceConfig;
    use cost_engine::EngineOptions;
    use cost_storage::{IngestPolicy, MemoryBackend};

    use super::*;

    async fn controller(config: AdminConfig) -> AdminController {
        let store = Arc::new(
            RecordStore::open(IngestPolicy::new("USD"), Arc::new(MemoryBackend::new()))
                .await
                .unwrap(),
        );
        let source: Arc<dyn cost_core::RecordSource> = store.clone();
        let engine = Arc::new(AggregationEngine::new(source, EngineOptions::default()));
        AdminController::new(store, engine, &config)
    }

    #[tokio::test]
    async fn configured_sources_are_registered() {
        let config = AdminConfig {
            sources: vec![SourceConfig {
                name: "billing-export".into(),
                path: "/tmp/billing.jsonl".into(),
            }],
            ..AdminConfig::default()
        };
        let admin = controller(config).await;
        assert_eq!(admin.source_names(), vec!["billing-export".to_string()]);
    }

    #[tokio::test]
    async fn unknown_source_is_not_found() {
        let admin = controller(AdminConfig::default()).await;
        let today = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        let err = admin
            .trigger_reimport("nope", ReimportWindow::Incremental, today)
            .await
            .unwrap_err();
        assert!(matches!(err, CostError::NotFound { kind: "reimport source", .. }));
        assert!(admin.operations().is_empty());
    }

    #[tokio::test]
    async fn unknown_operation_is_not_found() {
        let admin = controller(AdminConfig::default()).await;
        assert!(matches!(
            admin.operation(Uuid::new_v4()),
            Err(CostError::NotFound { kind: "operation", .. })
        ));
    }
}
