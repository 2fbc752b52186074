// SPDX-FileCopyrightText: 2026 Cost Explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable backing for the record store.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CostError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{RecordId, StoredRecord, UsageRecord};

/// One atomic unit of durable change.
#[derive(Debug, Default)]
pub struct WriteBatch {
    /// Newly appended records, in id order.
    pub appended: Vec<Arc<StoredRecord>>,
    /// Records withdrawn by a replace or removed by retention.
    pub removed: Vec<RecordId>,
}

impl WriteBatch {
    pub fn append(records: Vec<Arc<StoredRecord>>) -> Self {
        Self {
            appended: records,
            removed: Vec::new(),
        }
    }

    pub fn remove(ids: Vec<RecordId>) -> Self {
        Self {
            appended: Vec::new(),
            removed: ids,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.appended.is_empty() && self.removed.is_empty()
    }
}

/// Persistence boundary of the record store.
///
/// Commits are issued by the store's single writer, so a backend sees them
/// in append order and never concurrently.
#[async_trait]
pub trait RecordBackend: PluginAdapter {
    /// Applies the batch atomically: either every append and removal lands or none does.
    async fn commit(&self, batch: WriteBatch) -> Result<(), CostError>;

    /// Loads every live record, ordered by id.
    async fn load(&self) -> Result<Vec<(RecordId, UsageRecord)>, CostError>;
}
