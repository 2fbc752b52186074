// SPDX-FileCopyrightText: 2026 Cost Explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Aggregation engine and query planner.
//!
//! The engine keeps `(TimeBucket, DimensionKey)` cells up to date as records
//! are appended, marks them stale on invalidation, and rebuilds them from
//! store snapshots. The planner answers cost-breakdown queries from those
//! cells, scanning raw records where cells were never built.

pub mod aggregate;
pub mod cell;
pub mod marks;
pub mod planner;

pub use aggregate::{AggregationEngine, EngineOptions, EngineStats, RecomputeReport};
pub use cell::{CellId, CellSnapshot, IncrementOutcome};
pub use marks::InvalidationMark;
pub use planner::{QueryPlanner, StaleCellHook};
