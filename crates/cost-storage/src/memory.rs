// SPDX-FileCopyrightText: 2026 Cost Explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Volatile backend for development and tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use cost_core::{
    AdapterType, CostError, HealthStatus, PluginAdapter, RecordBackend, RecordId, UsageRecord,
    WriteBatch,
};

/// Keeps committed records in a map. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: Mutex<BTreeMap<RecordId, UsageRecord>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populates the backend, as if the records had been committed earlier.
    pub fn with_records(records: impl IntoIterator<Item = (RecordId, UsageRecord)>) -> Self {
        Self {
            records: Mutex::new(records.into_iter().collect()),
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl PluginAdapter for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Backend
    }

    async fn health_check(&self) -> Result<HealthStatus, CostError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), CostError> {
        Ok(())
    }
}

#[async_trait]
impl RecordBackend for MemoryBackend {
    async fn commit(&self, batch: WriteBatch) -> Result<(), CostError> {
        let mut records = self.records.lock();
        for id in &batch.removed {
            records.remove(id);
        }
        for stored in batch.appended {
            records.insert(stored.id, stored.record.clone());
        }
        Ok(())
    }

    async fn load(&self) -> Result<Vec<(RecordId, UsageRecord)>, CostError> {
        Ok(self
            .records
            .lock()
            .iter()
            .map(|(id, record)| (*id, record.clone()))
            .collect())
    }
}
