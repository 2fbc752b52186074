// SPDX-FileCopyrightText: 2026 Cost Explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the cost explorer.
//!
//! This crate provides the domain types shared by the record store, the
//! aggregation engine, the query planner, and the admin controller: records,
//! dimension keys, time buckets, queries, breakdowns, the error type, and the
//! traits at the seams between components.

pub mod dimension;
pub mod error;
pub mod query;
pub mod scan;
pub mod time;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use dimension::{DimensionFilter, DimensionKey, Interner};
pub use error::CostError;
pub use query::{BreakdownEntry, CostBreakdown, PlanStats, QuerySpec};
pub use scan::{Scan, ScanCursor, ScanPage, Snapshot};
pub use time::{Granularity, Period, TimeBucket, TimeRange};
pub use types::{AdapterType, HealthStatus, RecordId, StoredRecord, UsageRecord};

pub use traits::{
    AppendListener, PluginAdapter, RecordBackend, RecordSource, ReimportSource, WriteBatch,
};
