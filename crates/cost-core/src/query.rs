// SPDX-FileCopyrightText: 2026 Cost Explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query requests and cost breakdown results.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::dimension::DimensionFilter;
use crate::time::{Granularity, TimeRange};

/// A cost-breakdown request. Request-scoped, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuerySpec {
    /// Time range to report on. Expanded outward to whole base buckets.
    pub range: TimeRange,
    /// Only records matching every predicate contribute.
    #[serde(default)]
    pub filter: DimensionFilter,
    /// Dimensions to group by. Empty collapses every key into one group.
    #[serde(default)]
    pub group_by: Vec<String>,
    /// Time grouping. `None` collapses the whole range into one bucket.
    #[serde(default)]
    pub granularity: Option<Granularity>,
    /// Install cells computed by a fallback scan so later queries hit them.
    #[serde(default)]
    pub cache_fallback: bool,
}

impl QuerySpec {
    pub fn new(range: TimeRange) -> Self {
        Self {
            range,
            filter: DimensionFilter::default(),
            group_by: Vec::new(),
            granularity: None,
            cache_fallback: false,
        }
    }

    pub fn filter(mut self, filter: DimensionFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn group_by<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.group_by = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = Some(granularity);
        self
    }

    pub fn cache_fallback(mut self, enabled: bool) -> Self {
        self.cache_fallback = enabled;
        self
    }
}

/// One `(bucket, group)` row of a breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakdownEntry {
    /// Start of the reporting bucket, `None` for whole-range totals.
    pub bucket_start: Option<DateTime<Utc>>,
    /// Values of the grouping dimensions.
    pub group: BTreeMap<String, String>,
    pub sum_cost: Decimal,
    pub record_count: u64,
    /// At least one contributing cell is awaiting recomputation.
    pub stale: bool,
}

/// How the planner answered a query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStats {
    /// `(bucket, key)` pairs implied by the request.
    pub implied_cells: u64,
    /// Aggregate cells read.
    pub cells_read: u64,
    /// Of those, cells served stale.
    pub stale_cells: u64,
    /// Uncovered ranges answered by scanning raw records.
    pub fallback_scans: u64,
    /// Raw records folded in by fallback scans.
    pub fallback_records: u64,
}

/// Result of a cost-breakdown query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    /// The bucket-aligned range actually answered.
    pub range: TimeRange,
    pub granularity: Option<Granularity>,
    pub group_by: Vec<String>,
    pub currency: String,
    pub entries: Vec<BreakdownEntry>,
    pub total_cost: Decimal,
    pub total_records: u64,
    /// True if any entry is stale.
    pub stale: bool,
    pub stats: PlanStats,
}

impl CostBreakdown {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Orders entries by descending cost, ties broken by group.
    pub fn ranked(mut self) -> Self {
        self.entries.sort_by(|a, b| {
            b.sum_cost
                .cmp(&a.sum_cost)
                .then_with(|| a.group.cmp(&b.group))
                .then_with(|| a.bucket_start.cmp(&b.bucket_start))
        });
        self
    }
}
