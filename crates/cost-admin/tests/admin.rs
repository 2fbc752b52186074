// SPDX-FileCopyrightText: 2026 Cost Explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Admin controller against a live store and engine.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use cost_admin::{AdminController, OperationKind, OperationState, ReimportWindow, RetryPolicy};
use cost_core::{CostError, DimensionFilter, QuerySpec, TimeRange};
use cost_engine::QueryPlanner;
use cost_test_utils::TestHarness;
use cost_test_utils::fixtures::{hour, range, usage};

fn day(d: u32) -> TimeRange {
    range(hour(2026, 7, d, 0), hour(2026, 7, d + 1, 0))
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 7, 20).unwrap()
}

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        multiplier: 2.0,
        jitter: 0.0,
    }
}

fn admin_for(harness: &TestHarness) -> Arc<AdminController> {
    Arc::new(
        AdminController::new(
            Arc::clone(&harness.store),
            Arc::clone(&harness.engine),
            &harness.config.admin,
        )
        .with_retry_policy(fast_retry(5)),
    )
}

async fn wait_for_attempt(admin: &AdminController, id: uuid::Uuid, attempts: u32) {
    for _ in 0..500 {
        if admin.operation(id).unwrap().attempts >= attempts {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("operation {id} never reached attempt {attempts}");
}

#[tokio::test]
async fn overlapping_recompute_conflicts() {
    let harness = TestHarness::new().await.unwrap();
    harness
        .ingest(vec![usage(hour(2026, 7, 1, 9), &[("service", "compute")], 1.0)])
        .await
        .unwrap();
    let admin = admin_for(&harness);

    harness.source.close_gate();
    let held = Arc::clone(&admin);
    let task = tokio::spawn(async move {
        held.force_recompute(&day(1), &DimensionFilter::all()).await
    });
    harness.source.wait_blocked().await;

    let overlapping = range(hour(2026, 7, 1, 12), hour(2026, 7, 3, 0));
    let err = admin
        .force_recompute(&overlapping, &DimensionFilter::all())
        .await
        .unwrap_err();
    assert!(matches!(err, CostError::ConcurrencyConflict { range } if range == day(1)));
    assert!(matches!(
        admin.force_invalidate(&day(1), &DimensionFilter::all()),
        Err(CostError::ConcurrencyConflict { .. })
    ));

    // Disjoint ranges are not blocked.
    admin
        .force_invalidate(&day(5), &DimensionFilter::all())
        .unwrap();

    harness.source.open_gate();
    let report = task.await.unwrap().unwrap();
    assert_eq!(report.records_scanned, 1);
    admin
        .force_recompute(&overlapping, &DimensionFilter::all())
        .await
        .unwrap();
}

#[tokio::test]
async fn sub_bucket_ranges_in_one_hour_conflict() {
    let harness = TestHarness::new().await.unwrap();
    harness
        .ingest(vec![usage(hour(2026, 7, 1, 9), &[("service", "compute")], 1.0)])
        .await
        .unwrap();
    let admin = admin_for(&harness);
    let nine = hour(2026, 7, 1, 9);
    let minutes = move |from: i64, to: i64| {
        range(
            nine + chrono::Duration::minutes(from),
            nine + chrono::Duration::minutes(to),
        )
    };

    harness.source.close_gate();
    let held = Arc::clone(&admin);
    let task = tokio::spawn(async move {
        held.force_recompute(&minutes(10, 20), &DimensionFilter::all()).await
    });
    harness.source.wait_blocked().await;

    // Both widen to 09:00-10:00 inside the engine, so they must not run together.
    let err = tokio::time::timeout(
        Duration::from_secs(1),
        admin.force_recompute(&minutes(30, 40), &DimensionFilter::all()),
    )
    .await
    .expect("second recompute waited on the held scan")
    .unwrap_err();
    assert!(matches!(err, CostError::ConcurrencyConflict { .. }));
    assert!(matches!(
        admin.force_invalidate(&minutes(50, 55), &DimensionFilter::all()),
        Err(CostError::ConcurrencyConflict { .. })
    ));
    admin
        .force_invalidate(&minutes(60, 70), &DimensionFilter::all())
        .unwrap();

    harness.source.open_gate();
    let report = task.await.unwrap().unwrap();
    assert_eq!(report.range, range(nine, hour(2026, 7, 1, 10)));
}

#[tokio::test]
async fn operations_follow_the_state_machine() {
    let harness = TestHarness::new().await.unwrap();
    harness
        .ingest(vec![usage(hour(2026, 7, 2, 9), &[("service", "compute")], 2.0)])
        .await
        .unwrap();
    let admin = admin_for(&harness);

    harness.source.set_failing(true);
    let err = admin
        .force_recompute(&day(2), &DimensionFilter::all())
        .await
        .unwrap_err();
    assert!(matches!(err, CostError::Recompute { .. }));
    harness.source.set_failing(false);

    let report = admin
        .force_recompute(&day(2), &DimensionFilter::all())
        .await
        .unwrap();
    assert_eq!(report.cells_written, 1);

    let ops = admin.operations();
    assert_eq!(ops.len(), 2);
    let failed = ops.iter().find(|op| op.state == OperationState::Failed).unwrap();
    assert_eq!(failed.kind, OperationKind::Recompute);
    assert_eq!(failed.attempts, 1);
    assert!(failed.error.as_deref().unwrap().starts_with("recompute failed"));

    let completed = admin
        .operation(ops.iter().find(|op| op.state == OperationState::Completed).unwrap().id)
        .unwrap();
    assert!(completed.finished_at.is_some());
    assert_eq!(completed.detail.unwrap()["cells_written"], 1);
}

#[tokio::test]
async fn reimport_replaces_rather_than_double_counts() {
    let harness = TestHarness::new().await.unwrap();
    harness
        .ingest(vec![
            usage(hour(2026, 7, 3, 9), &[("service", "compute")], 1.0),
            usage(hour(2026, 7, 3, 10), &[("service", "compute")], 1.0),
            usage(hour(2026, 7, 3, 11), &[("service", "storage")], 1.0),
            // Outside the reimported day; must survive untouched.
            usage(hour(2026, 7, 4, 9), &[("service", "compute")], 5.0),
        ])
        .await
        .unwrap();

    let mut export = tempfile::NamedTempFile::new().unwrap();
    for (ts, service, cost) in [
        ("2026-07-03T09:00:00Z", "compute", 1.5),
        ("2026-07-03T10:30:00Z", "compute", 1.5),
        ("2026-07-04T09:00:00Z", "compute", 99.0),
    ] {
        writeln!(
            export,
            r#"{{"timestamp":"{ts}","dimensions":{{"service":"{service}"}},"quantity":1,"unit_cost":{cost},"currency":"USD"}}"#
        )
        .unwrap();
    }

    let admin = admin_for(&harness);
    admin.register_source(Arc::new(cost_admin::JsonLinesSource::new(
        "billing-export",
        export.path(),
    )));
    let report = admin
        .trigger_reimport("billing-export", ReimportWindow::Range { range: day(3) }, today())
        .await
        .unwrap();
    assert_eq!(report.fetched, 2);
    assert_eq!(report.withdrawn, 3);
    assert_eq!(report.appended.len(), 2);

    admin.drain().await;
    let recompute = admin.operation(report.recompute).unwrap();
    assert_eq!(recompute.state, OperationState::Completed);
    assert_eq!(
        admin.operation(report.operation).unwrap().state,
        OperationState::Completed
    );

    let reimported = harness.planner.execute(&QuerySpec::new(day(3))).await.unwrap();
    assert!(!reimported.stale);
    assert_eq!(reimported.total_cost, Decimal::new(3, 0));
    assert_eq!(reimported.total_records, 2);

    let untouched = harness.planner.execute(&QuerySpec::new(day(4))).await.unwrap();
    assert_eq!(untouched.total_cost, Decimal::new(5, 0));
    assert!(admin.marks().is_empty());

    // Running the same reimport again converges on the same totals.
    admin
        .trigger_reimport("billing-export", ReimportWindow::Range { range: day(3) }, today())
        .await
        .unwrap();
    admin.drain().await;
    let again = harness.planner.execute(&QuerySpec::new(day(3))).await.unwrap();
    assert_eq!(again.total_cost, Decimal::new(3, 0));
    assert_eq!(harness.store.len(), 3);
}

#[tokio::test]
async fn failed_reimport_fetch_marks_operation_failed() {
    let harness = TestHarness::new().await.unwrap();
    let admin = admin_for(&harness);
    admin.register_source(Arc::new(cost_admin::JsonLinesSource::new(
        "missing",
        "/nonexistent/export.jsonl",
    )));
    let err = admin
        .trigger_reimport("missing", ReimportWindow::Incremental, today())
        .await
        .unwrap_err();
    assert!(matches!(err, CostError::Storage { .. }));
    let ops = admin.operations();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].kind, OperationKind::Reimport);
    assert_eq!(ops[0].state, OperationState::Failed);
}

#[tokio::test]
async fn scheduled_recompute_retries_after_failure() {
    let harness = TestHarness::new().await.unwrap();
    harness
        .ingest(vec![usage(hour(2026, 7, 6, 9), &[("service", "compute")], 2.0)])
        .await
        .unwrap();
    harness.engine.invalidate(&day(6), &DimensionFilter::all());
    let admin = admin_for(&harness);

    harness.source.set_failing(true);
    let op = admin.schedule_recompute(&day(6), &DimensionFilter::all());
    assert_eq!(op.state, OperationState::Pending);
    wait_for_attempt(&admin, op.id, 2).await;
    harness.source.set_failing(false);

    admin.drain().await;
    let done = admin.operation(op.id).unwrap();
    assert_eq!(done.state, OperationState::Completed);
    assert!(done.attempts >= 2);
    assert!(harness.engine.marks().is_empty());
    let cell = harness
        .engine
        .cell(hour(2026, 7, 6, 9), &cost_core::DimensionKey::from_pairs([("service", "compute")]))
        .unwrap();
    assert!(!cell.stale);
}

#[tokio::test]
async fn scheduled_recompute_gives_up_after_budget() {
    let harness = TestHarness::new().await.unwrap();
    let admin = Arc::new(
        AdminController::new(
            Arc::clone(&harness.store),
            Arc::clone(&harness.engine),
            &harness.config.admin,
        )
        .with_retry_policy(fast_retry(2)),
    );
    harness.source.set_failing(true);
    let op = admin.schedule_recompute(&day(7), &DimensionFilter::all());
    admin.drain().await;
    let failed = admin.operation(op.id).unwrap();
    assert_eq!(failed.state, OperationState::Failed);
    assert_eq!(failed.attempts, 2);
}

#[tokio::test]
async fn stale_read_schedules_background_recompute() {
    let harness = TestHarness::new().await.unwrap();
    harness
        .ingest(vec![usage(hour(2026, 7, 8, 9), &[("service", "compute")], 4.0)])
        .await
        .unwrap();
    let admin = admin_for(&harness);
    let planner = QueryPlanner::from_config(Arc::clone(&harness.engine), &harness.config)
        .with_stale_hook(Arc::clone(&admin) as Arc<dyn cost_engine::StaleCellHook>);

    admin.force_invalidate(&day(8), &DimensionFilter::all()).unwrap();
    let stale = planner.execute(&QuerySpec::new(day(8))).await.unwrap();
    assert!(stale.stale);
    assert_eq!(stale.total_cost, Decimal::new(4, 0));

    admin.drain().await;
    let fresh = planner.execute(&QuerySpec::new(day(8))).await.unwrap();
    assert!(!fresh.stale);
    assert_eq!(fresh.total_cost, Decimal::new(4, 0));
    assert!(admin
        .operations()
        .iter()
        .any(|op| op.kind == OperationKind::ScheduledRecompute
            && op.state == OperationState::Completed));
}

#[tokio::test]
async fn shutdown_cancels_pending_retries() {
    let harness = TestHarness::new().await.unwrap();
    let admin = Arc::new(
        AdminController::new(
            Arc::clone(&harness.store),
            Arc::clone(&harness.engine),
            &harness.config.admin,
        )
        .with_retry_policy(RetryPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(60),
            multiplier: 1.0,
            jitter: 0.0,
        }),
    );
    harness.source.set_failing(true);
    let op = admin.schedule_recompute(&day(9), &DimensionFilter::all());
    wait_for_attempt(&admin, op.id, 1).await;
    tokio::time::timeout(Duration::from_secs(5), admin.shutdown())
        .await
        .unwrap();
    let op = admin.operation(op.id).unwrap();
    assert_eq!(op.state, OperationState::Failed);
    assert_eq!(op.error.as_deref(), Some("operation cancelled"));
}
