// SPDX-FileCopyrightText: 2026 Cost Explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Long-running maintenance tasks spawned by the server.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cost_core::{CostError, TimeBucket};
use cost_engine::AggregationEngine;
use cost_storage::RecordStore;

/// Outcome of one retention pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Bucket-aligned cutoff actually applied.
    pub cutoff: DateTime<Utc>,
    pub records_removed: usize,
    pub cells_expired: usize,
}

/// Removes records and cells older than `cutoff`.
///
/// The cutoff is aligned down to the engine's base bucket so no surviving
/// cell ever summarises a removed record.
pub async fn sweep_once(
    store: &RecordStore,
    engine: &AggregationEngine,
    cutoff: DateTime<Utc>,
) -> Result<SweepOutcome, CostError> {
    let cutoff = TimeBucket::containing(cutoff, engine.base_granularity()).start;
    let records_removed = store.retention_sweep(cutoff).await?;
    let cells_expired = engine.expire_before(cutoff);
    Ok(SweepOutcome {
        cutoff,
        records_removed,
        cells_expired,
    })
}

/// `now - max_age`, or `None` when that instant is not representable.
pub fn retention_cutoff(now: DateTime<Utc>, max_age: chrono::Duration) -> Option<DateTime<Utc>> {
    now.checked_sub_signed(max_age)
}

/// Applies the retention window every `every` until cancelled.
///
/// The first pass runs immediately.
pub async fn retention_sweeper(
    store: Arc<RecordStore>,
    engine: Arc<AggregationEngine>,
    max_age: chrono::Duration,
    every: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(every);
    info!(max_age_days = max_age.num_days(), interval_secs = every.as_secs(), "retention sweeper started");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let Some(cutoff) = retention_cutoff(Utc::now(), max_age) else {
                    warn!(max_age_days = max_age.num_days(), "retention window reaches past the earliest representable time, skipping pass");
                    continue;
                };
                match sweep_once(&store, &engine, cutoff).await {
                    Ok(outcome) if outcome.records_removed + outcome.cells_expired > 0 => {
                        info!(
                            cutoff = %outcome.cutoff,
                            records = outcome.records_removed,
                            cells = outcome.cells_expired,
                            "retention pass removed expired data"
                        );
                    }
                    Ok(_) => debug!("retention pass found nothing to remove"),
                    Err(e) => warn!(error = %e, "retention pass failed, retrying next interval"),
                }
            }
            _ = cancel.cancelled() => {
                info!("retention sweeper shutting down");
                break;
            }
        }
    }
}

/// Publishes engine gauges, compacts withdrawn records and samples heap
/// usage every `every` until cancelled.
pub async fn housekeeping(
    store: Arc<RecordStore>,
    engine: Arc<AggregationEngine>,
    every: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                engine.publish_gauges();
                let purged = store.compact();
                let (allocated, resident) = heap_stats();
                debug!(
                    records = store.len(),
                    pending_compaction = store.pending_compaction(),
                    purged,
                    allocated_mb = allocated / (1024 * 1024),
                    resident_mb = resident / (1024 * 1024),
                    "housekeeping tick"
                );
            }
            _ = cancel.cancelled() => {
                debug!("housekeeping loop shutting down");
                break;
            }
        }
    }
}

/// Allocated and resident heap bytes from jemalloc.
#[cfg(not(target_env = "msvc"))]
fn heap_stats() -> (usize, usize) {
    // Stats are cached until the epoch advances.
    let _ = tikv_jemalloc_ctl::epoch::advance();
    let allocated = tikv_jemalloc_ctl::stats::allocated::read().unwrap_or(0);
    let resident = tikv_jemalloc_ctl::stats::resident::read().unwrap_or(0);
    (allocated, resident)
}

#[cfg(target_env = "msvc")]
fn heap_stats() -> (usize, usize) {
    (0, 0)
}
