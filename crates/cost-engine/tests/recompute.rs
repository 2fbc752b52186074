// SPDX-FileCopyrightText: 2026 Cost Explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Recompute under concurrent appends, failures, and cancellation.

use std::sync::Arc;

use cost_core::{CostError, DimensionFilter, DimensionKey, QuerySpec};
use cost_test_utils::TestHarness;
use cost_test_utils::fixtures::{hour, range, usage};
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

fn compute() -> DimensionKey {
    DimensionKey::from_pairs([("service", "compute")])
}

fn day() -> cost_core::TimeRange {
    range(hour(2026, 7, 1, 0), hour(2026, 7, 2, 0))
}

#[tokio::test]
async fn appends_during_recompute_are_not_lost() {
    let harness = TestHarness::new().await.unwrap();
    harness
        .ingest(vec![
            usage(hour(2026, 7, 1, 9), &[("service", "compute")], 1.0),
            usage(hour(2026, 7, 1, 9), &[("service", "compute")], 2.0),
        ])
        .await
        .unwrap();

    harness.source.close_gate();
    let engine = Arc::clone(&harness.engine);
    let task = tokio::spawn(async move {
        engine
            .recompute(&day(), &DimensionFilter::all(), &CancellationToken::new())
            .await
    });
    harness.source.wait_blocked().await;

    // Lands after the recompute's snapshot, so only the rebuild log sees it.
    harness
        .ingest(vec![
            usage(hour(2026, 7, 1, 9), &[("service", "compute")], 4.0),
            usage(hour(2026, 7, 1, 10), &[("service", "compute")], 8.0),
        ])
        .await
        .unwrap();
    harness.source.open_gate();

    let report = task.await.unwrap().unwrap();
    assert_eq!(report.records_scanned, 2);
    let nine = harness.engine.cell(hour(2026, 7, 1, 9), &compute()).unwrap();
    assert_eq!(nine.sum_cost, Decimal::new(7, 0));
    assert_eq!(nine.record_count, 3);
    let ten = harness.engine.cell(hour(2026, 7, 1, 10), &compute()).unwrap();
    assert_eq!(ten.sum_cost, Decimal::new(8, 0));

    // Later increments still apply exactly once.
    harness
        .ingest(vec![usage(hour(2026, 7, 1, 9), &[("service", "compute")], 0.5)])
        .await
        .unwrap();
    let nine = harness.engine.cell(hour(2026, 7, 1, 9), &compute()).unwrap();
    assert_eq!(nine.sum_cost, Decimal::new(75, 1));
    assert_eq!(nine.record_count, 4);
}

#[tokio::test]
async fn failed_recompute_serves_prior_sum_as_stale() {
    let harness = TestHarness::new().await.unwrap();
    harness
        .ingest(vec![
            usage(hour(2026, 7, 1, 9), &[("service", "compute")], 1.0),
            usage(hour(2026, 7, 1, 9), &[("service", "compute")], 2.5),
            usage(hour(2026, 7, 1, 9), &[("service", "compute")], 0.75),
        ])
        .await
        .unwrap();
    let h = range(hour(2026, 7, 1, 9), hour(2026, 7, 1, 10));
    harness.engine.invalidate(&h, &DimensionFilter::all());

    harness.source.set_failing(true);
    let err = harness
        .engine
        .recompute(&h, &DimensionFilter::all(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, CostError::Recompute { .. }));
    harness.source.set_failing(false);

    let result = harness.planner.execute(&QuerySpec::new(h)).await.unwrap();
    assert_eq!(result.total_cost, Decimal::new(425, 2));
    assert_eq!(result.total_records, 3);
    assert!(result.stale);
    assert_eq!(harness.engine.marks().len(), 1);
}

#[tokio::test]
async fn cancelled_mid_scan_leaves_cells_untouched() {
    let harness = TestHarness::new().await.unwrap();
    harness
        .ingest(vec![usage(hour(2026, 7, 1, 9), &[("service", "compute")], 3.0)])
        .await
        .unwrap();
    harness.engine.invalidate(&day(), &DimensionFilter::all());

    harness.source.close_gate();
    let cancel = CancellationToken::new();
    let engine = Arc::clone(&harness.engine);
    let token = cancel.clone();
    let task = tokio::spawn(async move {
        engine
            .recompute(&day(), &DimensionFilter::all(), &token)
            .await
    });
    harness.source.wait_blocked().await;
    cancel.cancel();
    harness.source.open_gate();

    assert!(matches!(task.await.unwrap(), Err(CostError::Cancelled)));
    let cell = harness.engine.cell(hour(2026, 7, 1, 9), &compute()).unwrap();
    assert!(cell.stale);
    assert_eq!(cell.sum_cost, Decimal::new(3, 0));
    assert_eq!(harness.engine.stats().active_rebuilds, 0);
}

#[tokio::test]
async fn replace_then_recompute_does_not_double_count() {
    let harness = TestHarness::new().await.unwrap();
    harness
        .ingest(vec![
            usage(hour(2026, 7, 1, 9), &[("service", "compute")], 1.0),
            usage(hour(2026, 7, 1, 11), &[("service", "compute")], 1.0),
        ])
        .await
        .unwrap();

    harness.engine.invalidate(&day(), &DimensionFilter::all());
    harness
        .store
        .replace(
            &day(),
            &DimensionFilter::all(),
            vec![
                usage(hour(2026, 7, 1, 9), &[("service", "compute")], 1.5),
                usage(hour(2026, 7, 1, 11), &[("service", "compute")], 1.5),
            ],
        )
        .await
        .unwrap();

    let stale = harness.planner.execute(&QuerySpec::new(day())).await.unwrap();
    assert!(stale.stale);

    harness
        .engine
        .recompute(&day(), &DimensionFilter::all(), &CancellationToken::new())
        .await
        .unwrap();
    let fresh = harness.planner.execute(&QuerySpec::new(day())).await.unwrap();
    assert!(!fresh.stale);
    assert_eq!(fresh.total_cost, Decimal::new(3, 0));
    assert_eq!(fresh.total_records, 2);
    assert!(harness.engine.marks().is_empty());
}

#[tokio::test]
async fn recompute_against_sqlite_backend() {
    let harness = TestHarness::builder().with_sqlite().build().await.unwrap();
    harness
        .ingest(vec![
            usage(hour(2026, 7, 1, 9), &[("service", "compute")], 1.25),
            usage(hour(2026, 7, 1, 9), &[("service", "storage")], 0.5),
        ])
        .await
        .unwrap();
    let report = harness
        .engine
        .recompute(&day(), &DimensionFilter::all(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.cells_written, 2);
    let cell = harness.engine.cell(hour(2026, 7, 1, 9), &compute()).unwrap();
    assert_eq!(cell.sum_cost, Decimal::new(125, 2));
}
