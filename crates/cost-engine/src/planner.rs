// SPDX-FileCopyrightText: 2026 Cost Explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query planning over the cell arena.
//!
//! A query is answered from cells wherever the engine has rebuilt the range
//! for every key. Ranges it has not (lazy start) are answered by one scan
//! each, or rebuilt first when the caller asks for the result to be cached.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use cost_config::CostExplorerConfig;
use cost_core::{
    BreakdownEntry, CostBreakdown, CostError, DimensionFilter, DimensionKey, Granularity, Period,
    PlanStats, QuerySpec, Scan, TimeRange,
};

use crate::aggregate::AggregationEngine;
use crate::cell::CellId;

/// Notified when a query served stale cells.
///
/// `range` spans the stale buckets plus every overlapping invalidation mark,
/// so recomputing it with `filter` clears those marks.
pub trait StaleCellHook: Send + Sync {
    fn stale_cells_read(&self, range: &TimeRange, filter: &DimensionFilter);
}

type Slot = (Option<DateTime<Utc>>, BTreeMap<String, String>);

#[derive(Default)]
struct Acc {
    sum: Decimal,
    count: u64,
    stale: bool,
}

/// Folds `(bucket, key)` contributions into breakdown entries.
struct Breakdown<'a> {
    spec: &'a QuerySpec,
    slots: BTreeMap<Slot, Acc>,
}

impl<'a> Breakdown<'a> {
    fn new(spec: &'a QuerySpec) -> Self {
        Self {
            spec,
            slots: BTreeMap::new(),
        }
    }

    fn add(
        &mut self,
        bucket_start: DateTime<Utc>,
        key: &DimensionKey,
        sum: Decimal,
        count: u64,
        stale: bool,
    ) -> Result<(), CostError> {
        let bucket = self.spec.granularity.map(|g| g.truncate(bucket_start));
        let acc = self
            .slots
            .entry((bucket, key.project(&self.spec.group_by)))
            .or_default();
        acc.sum = acc
            .sum
            .checked_add(sum)
            .ok_or_else(|| CostError::Overflow(format!("cost sum of a group at {bucket_start}")))?;
        acc.count += count;
        acc.stale |= stale;
        Ok(())
    }

    fn finish(
        self,
        range: TimeRange,
        currency: &str,
        stats: PlanStats,
    ) -> Result<CostBreakdown, CostError> {
        let entries: Vec<BreakdownEntry> = self
            .slots
            .into_iter()
            .map(|((bucket_start, group), acc)| BreakdownEntry {
                bucket_start,
                group,
                sum_cost: acc.sum,
                record_count: acc.count,
                stale: acc.stale,
            })
            .collect();
        let total_cost = entries
            .iter()
            .try_fold(Decimal::ZERO, |total, e| total.checked_add(e.sum_cost))
            .ok_or_else(|| CostError::Overflow(format!("total cost over {range}")))?;
        Ok(CostBreakdown {
            range,
            granularity: self.spec.granularity,
            group_by: self.spec.group_by.clone(),
            currency: currency.to_string(),
            total_cost,
            total_records: entries.iter().map(|e| e.record_count).sum(),
            stale: entries.iter().any(|e| e.stale),
            entries,
            stats,
        })
    }
}

/// Translates [`QuerySpec`]s into cell lookups and fallback scans.
pub struct QueryPlanner {
    engine: Arc<AggregationEngine>,
    max_cells: u64,
    currency: String,
    stale_hook: Option<Arc<dyn StaleCellHook>>,
}

impl QueryPlanner {
    pub fn new(engine: Arc<AggregationEngine>, max_cells: u64, currency: impl Into<String>) -> Self {
        Self {
            engine,
            max_cells,
            currency: currency.into(),
            stale_hook: None,
        }
    }

    pub fn from_config(engine: Arc<AggregationEngine>, config: &CostExplorerConfig) -> Self {
        Self::new(engine, config.query.max_cells, config.ingest.currency.clone())
    }

    pub fn with_stale_hook(mut self, hook: Arc<dyn StaleCellHook>) -> Self {
        self.stale_hook = Some(hook);
        self
    }

    pub fn engine(&self) -> &Arc<AggregationEngine> {
        &self.engine
    }

    pub fn max_cells(&self) -> u64 {
        self.max_cells
    }

    fn validate(&self, spec: &QuerySpec) -> Result<(), CostError> {
        let base = self.engine.base_granularity();
        if let Some(granularity) = spec.granularity {
            if granularity < base {
                return Err(CostError::Validation(format!(
                    "granularity `{granularity}` is finer than the base bucket width `{base}`"
                )));
            }
        }
        if spec.group_by.iter().any(|name| name.trim().is_empty()) {
            return Err(CostError::Validation(
                "group_by dimension names must be non-empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Answers `spec` from cells, scanning raw records where the arena has gaps.
    pub async fn execute(&self, spec: &QuerySpec) -> Result<CostBreakdown, CostError> {
        let started = Instant::now();
        self.validate(spec)?;
        let base = self.engine.base_granularity();
        let range = spec.range.align(base);

        let mut keys = self.engine.keys_matching(&spec.filter);
        let implied = base
            .bucket_count(&range)
            .saturating_mul(keys.len().max(1) as u64);
        if implied > self.max_cells {
            debug!(range = %range, implied, cap = self.max_cells, "query rejected by cell cap");
            return Err(CostError::RangeTooLarge {
                cells: implied,
                cap: self.max_cells,
            });
        }

        let mut gaps = self.engine.uncovered(&range);
        if spec.cache_fallback && !gaps.is_empty() {
            gaps = self.install_gaps(gaps).await;
            keys = self.engine.keys_matching(&spec.filter);
        }

        let mut stats = PlanStats {
            implied_cells: implied,
            ..PlanStats::default()
        };
        let mut breakdown = Breakdown::new(spec);
        let mut stale_span: Option<TimeRange> = None;

        for bucket in range.buckets(base) {
            if gaps.iter().any(|gap| gap.contains(bucket.start)) {
                continue;
            }
            for key in &keys {
                let Some((sum, count, stale)) =
                    self.engine.read(&CellId::new(bucket.start, key.clone()))
                else {
                    continue;
                };
                stats.cells_read += 1;
                if stale {
                    stats.stale_cells += 1;
                    let span = bucket.range();
                    stale_span = Some(stale_span.map_or(span, |s| s.hull(&span)));
                }
                breakdown.add(bucket.start, key, sum, count, stale)?;
            }
        }

        for gap in &gaps {
            let records = Scan::new(
                Arc::clone(self.engine.source()),
                *gap,
                spec.filter.clone(),
                self.engine.options().page_size,
            )
            .collect()
            .await?;
            for record in &records {
                let bucket_start = base.truncate(record.timestamp());
                breakdown.add(bucket_start, &record.key, record.cost, 1, false)?;
            }
            stats.fallback_scans += 1;
            stats.fallback_records += records.len() as u64;
            cost_prometheus::record_fallback_scan(records.len() as u64);
        }

        if let Some(span) = stale_span {
            self.notify_stale(span);
        }

        let kind = if gaps.is_empty() { "cells" } else { "fallback" };
        let result = breakdown.finish(range, &self.currency, stats)?;
        debug!(
            range = %range,
            entries = result.entries.len(),
            cells_read = result.stats.cells_read,
            fallback_records = result.stats.fallback_records,
            stale = result.stale,
            "query executed"
        );
        cost_prometheus::record_query(kind, started.elapsed());
        Ok(result)
    }

    /// Rebuilds each gap in the arena; returns the gaps that could not be.
    async fn install_gaps(&self, gaps: Vec<TimeRange>) -> Vec<TimeRange> {
        let mut remaining = Vec::new();
        for gap in gaps {
            let result = self
                .engine
                .recompute(&gap, &DimensionFilter::all(), &CancellationToken::new())
                .await;
            if let Err(e) = result {
                warn!(range = %gap, error = %e, "caching fallback range failed, scanning instead");
                remaining.push(gap);
            }
        }
        remaining
    }

    fn notify_stale(&self, span: TimeRange) {
        let Some(hook) = &self.stale_hook else {
            return;
        };
        let span = self
            .engine
            .marks()
            .iter()
            .filter(|mark| mark.range.overlaps(&span))
            .fold(span, |acc, mark| acc.hull(&mark.range));
        hook.stale_cells_read(&span, &DimensionFilter::all());
    }

    /// Cost per day over `period`.
    pub async fn daily_totals(
        &self,
        period: Period,
        filter: DimensionFilter,
        today: NaiveDate,
    ) -> Result<CostBreakdown, CostError> {
        let spec = QuerySpec::new(period.resolve(today)?)
            .filter(filter)
            .granularity(Granularity::Day);
        self.execute(&spec).await
    }

    /// Cost per calendar month over `period`.
    pub async fn monthly_totals(
        &self,
        period: Period,
        filter: DimensionFilter,
        today: NaiveDate,
    ) -> Result<CostBreakdown, CostError> {
        let spec = QuerySpec::new(period.resolve(today)?)
            .filter(filter)
            .granularity(Granularity::Month);
        self.execute(&spec).await
    }

    /// Cost per value of one dimension over `period`, most expensive first.
    pub async fn cost_by(
        &self,
        dimension: &str,
        period: Period,
        filter: DimensionFilter,
        today: NaiveDate,
    ) -> Result<CostBreakdown, CostError> {
        let spec = QuerySpec::new(period.resolve(today)?)
            .filter(filter)
            .group_by([dimension]);
        Ok(self.execute(&spec).await?.ranked())
    }
}
