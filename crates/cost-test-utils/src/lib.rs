// SPDX-FileCopyrightText: 2026 Cost Explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for cost explorer integration tests.
//!
//! # Components
//!
//! - [`fixtures`] - record and time range builders
//! - [`MockBackend`] - record backend with an injectable failure switch
//! - [`ControlledSource`] - record source that can fail or pause scans
//! - [`TestHarness`] - store, engine, and planner wired together

pub mod controlled_source;
pub mod fixtures;
pub mod harness;
pub mod mock_backend;

pub use controlled_source::ControlledSource;
pub use harness::TestHarness;
pub use mock_backend::MockBackend;

#[cfg(test)]
mod tests {
    use cost_core::{DimensionFilter, QuerySpec};
    use rust_decimal::Decimal;

    use super::fixtures::{hour, range, usage};
    use super::*;

    #[tokio::test]
    async fn harness_wires_store_to_engine() {
        let harness = TestHarness::new().await.unwrap();
        harness
            .ingest(vec![usage(hour(2026, 5, 1, 3), &[("user", "alice")], 2.0)])
            .await
            .unwrap();
        let result = harness
            .planner
            .execute(&QuerySpec::new(range(hour(2026, 5, 1, 0), hour(2026, 5, 2, 0))))
            .await
            .unwrap();
        assert_eq!(result.total_cost, Decimal::new(2, 0));
        assert_eq!(result.stats.fallback_scans, 0);
    }

    #[tokio::test]
    async fn failing_backend_rejects_appends() {
        let backend = std::sync::Arc::new(MockBackend::new());
        let harness = TestHarness::builder()
            .with_backend(backend.clone())
            .build()
            .await
            .unwrap();
        backend.set_failing(true);
        let result = harness
            .ingest(vec![usage(hour(2026, 5, 1, 3), &[("user", "alice")], 2.0)])
            .await;
        assert!(result.is_err());
        assert!(harness.store.is_empty());
        assert!(harness.engine.keys_matching(&DimensionFilter::all()).is_empty());
    }
}
