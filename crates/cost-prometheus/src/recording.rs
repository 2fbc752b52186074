// SPDX-FileCopyrightText: 2026 Cost Explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Metric registration and recording helpers.
//!
//! Uses the metrics-rs facade so any recorder can collect these metrics.

use std::time::Duration;

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

/// Register all cost explorer metric descriptions.
///
/// Called once at startup after the recorder is installed.
pub fn register_metrics() {
    describe_counter!("cost_records_appended_total", "Usage records accepted by the store");
    describe_counter!(
        "cost_records_rejected_total",
        "Usage records rejected at ingestion, by reason"
    );
    describe_counter!(
        "cost_increments_total",
        "Aggregate increments by outcome (applied, duplicate, below_floor)"
    );
    describe_counter!("cost_queries_total", "Queries executed, by kind");
    describe_counter!(
        "cost_fallback_scans_total",
        "Uncovered ranges answered by scanning raw records"
    );
    describe_counter!("cost_fallback_records_total", "Raw records folded in by fallback scans");
    describe_counter!("cost_recomputes_total", "Recomputations by outcome");
    describe_counter!("cost_retention_swept_total", "Records removed by retention sweeps");
    describe_counter!("cost_admin_operations_total", "Admin operations by kind and final state");
    describe_gauge!("cost_records", "Live records held by the store");
    describe_gauge!("cost_cells", "Aggregate cells in the arena");
    describe_gauge!("cost_cells_stale", "Aggregate cells awaiting recomputation");
    describe_gauge!("cost_invalidation_marks", "Outstanding invalidation marks");
    describe_histogram!(
        "cost_query_duration_seconds",
        Unit::Seconds,
        "Query planning and execution latency"
    );
    describe_histogram!(
        "cost_recompute_duration_seconds",
        Unit::Seconds,
        "Recompute latency"
    );
}

pub fn record_appended(count: usize) {
    metrics::counter!("cost_records_appended_total").increment(count as u64);
}

/// Record an ingestion rejection. `reason` is a short fixed label.
pub fn record_rejected(reason: &'static str) {
    metrics::counter!("cost_records_rejected_total", "reason" => reason).increment(1);
}

pub fn record_increment(outcome: &'static str) {
    metrics::counter!("cost_increments_total", "outcome" => outcome).increment(1);
}

pub fn record_query(kind: &'static str, elapsed: Duration) {
    metrics::counter!("cost_queries_total", "kind" => kind).increment(1);
    metrics::histogram!("cost_query_duration_seconds", "kind" => kind)
        .record(elapsed.as_secs_f64());
}

pub fn record_fallback_scan(records: u64) {
    metrics::counter!("cost_fallback_scans_total").increment(1);
    metrics::counter!("cost_fallback_records_total").increment(records);
}

/// Record a finished recompute. `outcome` is `completed`, `failed`, or `cancelled`.
pub fn record_recompute(outcome: &'static str, elapsed: Duration) {
    metrics::counter!("cost_recomputes_total", "outcome" => outcome).increment(1);
    metrics::histogram!("cost_recompute_duration_seconds").record(elapsed.as_secs_f64());
}

pub fn record_retention_sweep(removed: usize) {
    metrics::counter!("cost_retention_swept_total").increment(removed as u64);
}

pub fn record_admin_operation(kind: &'static str, state: &'static str) {
    metrics::counter!("cost_admin_operations_total", "kind" => kind, "state" => state)
        .increment(1);
}

pub fn set_record_count(count: usize) {
    metrics::gauge!("cost_records").set(count as f64);
}

pub fn set_cell_count(count: usize) {
    metrics::gauge!("cost_cells").set(count as f64);
}

pub fn set_stale_cells(count: usize) {
    metrics::gauge!("cost_cells_stale").set(count as f64);
}

pub fn set_open_marks(count: usize) {
    metrics::gauge!("cost_invalidation_marks").set(count as f64);
}
