// SPDX-FileCopyrightText: 2026 Cost Explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Record types and adapter identity types.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::dimension::DimensionKey;
use crate::error::CostError;

/// Identifier assigned by the record store, strictly increasing in append order.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl RecordId {
    pub fn next(self) -> RecordId {
        RecordId(self.0 + 1)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A normalized usage fact. Immutable once ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UsageRecord {
    /// When the usage happened.
    pub timestamp: DateTime<Utc>,
    /// Categorical attributes such as `user`, `model`, `service`, `region`.
    pub dimensions: BTreeMap<String, String>,
    /// Units consumed.
    pub quantity: f64,
    /// Price per unit.
    pub unit_cost: f64,
    /// ISO 4217 currency code.
    pub currency: String,
}

impl UsageRecord {
    /// Exact cost of this record, `quantity * unit_cost`.
    pub fn cost(&self) -> Result<Decimal, CostError> {
        let quantity = Decimal::try_from(self.quantity).map_err(|e| {
            CostError::Validation(format!("quantity {} is not representable: {e}", self.quantity))
        })?;
        let unit_cost = Decimal::try_from(self.unit_cost).map_err(|e| {
            CostError::Validation(format!(
                "unit_cost {} is not representable: {e}",
                self.unit_cost
            ))
        })?;
        quantity.checked_mul(unit_cost).ok_or_else(|| {
            CostError::Validation(format!(
                "cost of {} x {} overflows",
                self.quantity, self.unit_cost
            ))
        })
    }
}

const ACTIVE: u64 = u64::MAX;

/// A record as held by the record store: the fact plus its id, interned key,
/// and precomputed cost.
#[derive(Debug)]
pub struct StoredRecord {
    pub id: RecordId,
    pub record: UsageRecord,
    pub key: DimensionKey,
    pub cost: Decimal,
    /// Store epoch at which the record was withdrawn, `ACTIVE` while live.
    withdrawn_epoch: AtomicU64,
}

impl StoredRecord {
    pub fn new(id: RecordId, record: UsageRecord, key: DimensionKey, cost: Decimal) -> Self {
        Self {
            id,
            record,
            key,
            cost,
            withdrawn_epoch: AtomicU64::new(ACTIVE),
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.record.timestamp
    }

    pub fn is_active(&self) -> bool {
        self.withdrawn_epoch.load(Ordering::Acquire) == ACTIVE
    }

    /// Epoch of the withdrawal, if the record has been withdrawn.
    pub fn withdrawn_epoch(&self) -> Option<u64> {
        let epoch = self.withdrawn_epoch.load(Ordering::Acquire);
        (epoch != ACTIVE).then_some(epoch)
    }

    /// Marks the record withdrawn as of `epoch`. Scans whose snapshot predates
    /// `epoch` still observe it.
    pub fn mark_withdrawn(&self, epoch: u64) {
        self.withdrawn_epoch.store(epoch, Ordering::Release);
    }

    /// Whether a scan at `snapshot_epoch` still observes this record.
    pub fn visible_at(&self, snapshot_epoch: u64) -> bool {
        self.withdrawn_epoch.load(Ordering::Acquire) > snapshot_epoch
    }
}

/// Health status reported by adapter health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Adapter is fully operational.
    Healthy,
    /// Adapter is operational but experiencing issues.
    Degraded(String),
    /// Adapter is not operational.
    Unhealthy(String),
}

/// Identifies the kind of adapter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum AdapterType {
    /// Durable backing of the record store.
    Backend,
    /// External source of records for admin reimports.
    ReimportSource,
    /// Metrics exporter.
    Observability,
}
