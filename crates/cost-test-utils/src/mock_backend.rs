// SPDX-FileCopyrightText: 2026 Cost Explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Record backend whose commits can be made to fail on demand.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use cost_core::{
    AdapterType, CostError, HealthStatus, PluginAdapter, RecordBackend, RecordId, UsageRecord,
    WriteBatch,
};

/// In-memory backend with a failure switch and a commit counter.
#[derive(Default)]
pub struct MockBackend {
    records: Mutex<BTreeMap<RecordId, UsageRecord>>,
    failing: AtomicBool,
    commits: AtomicUsize,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following commit and health check fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Successful commits so far.
    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    fn check(&self) -> Result<(), CostError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CostError::storage(std::io::Error::other(
                "injected backend failure",
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl PluginAdapter for MockBackend {
    fn name(&self) -> &str {
        "mock-backend"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Backend
    }

    async fn health_check(&self) -> Result<HealthStatus, CostError> {
        match self.check() {
            Ok(()) => Ok(HealthStatus::Healthy),
            Err(e) => Ok(HealthStatus::Unhealthy(e.to_string())),
        }
    }

    async fn shutdown(&self) -> Result<(), CostError> {
        Ok(())
    }
}

#[async_trait]
impl RecordBackend for MockBackend {
    async fn commit(&self, batch: WriteBatch) -> Result<(), CostError> {
        self.check()?;
        let mut records = self.records.lock();
        for id in &batch.removed {
            records.remove(id);
        }
        for stored in &batch.appended {
            records.insert(stored.id, stored.record.clone());
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load(&self) -> Result<Vec<(RecordId, UsageRecord)>, CostError> {
        self.check()?;
        Ok(self
            .records
            .lock()
            .iter()
            .map(|(id, record)| (*id, record.clone()))
            .collect())
    }
}
