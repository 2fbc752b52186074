// SPDX-FileCopyrightText: 2026 Cost Explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Admin operation records and their state machine.
//!
//! Every operation moves `Pending -> Running -> {Completed | Failed}`. A
//! background recompute that backs off between attempts returns to
//! `Pending` while it waits. Finished operations are kept up to a bounded
//! history; in-flight ones are never evicted.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use strum::{Display, IntoStaticStr};
use uuid::Uuid;

use cost_core::{CostError, DimensionFilter, TimeRange};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OperationKind {
    Invalidate,
    Recompute,
    Reimport,
    ScheduledRecompute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OperationState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl OperationState {
    pub fn is_finished(self) -> bool {
        matches!(self, OperationState::Completed | OperationState::Failed)
    }

    fn can_become(self, next: OperationState) -> bool {
        use OperationState::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Failed)
                | (Running, Pending)
                | (Running, Completed)
                | (Running, Failed)
        )
    }
}

/// One admin operation as reported by `GET /admin/operations`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdminOperation {
    pub id: Uuid,
    pub kind: OperationKind,
    pub range: TimeRange,
    pub filter: DimensionFilter,
    pub state: OperationState,
    /// Times the operation entered `Running`.
    pub attempts: u32,
    pub error: Option<String>,
    /// Kind-specific result, e.g. a recompute report.
    pub detail: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Concurrent registry of admin operations.
pub struct OperationRegistry {
    ops: DashMap<Uuid, AdminOperation>,
    finished: Mutex<VecDeque<Uuid>>,
    history: usize,
}

impl OperationRegistry {
    pub fn new(history: usize) -> Self {
        Self {
            ops: DashMap::new(),
            finished: Mutex::new(VecDeque::new()),
            history: history.max(1),
        }
    }

    /// Registers a new `Pending` operation.
    pub fn create(
        &self,
        kind: OperationKind,
        range: TimeRange,
        filter: DimensionFilter,
    ) -> AdminOperation {
        let now = Utc::now();
        let op = AdminOperation {
            id: Uuid::new_v4(),
            kind,
            range,
            filter,
            state: OperationState::Pending,
            attempts: 0,
            error: None,
            detail: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        };
        self.ops.insert(op.id, op.clone());
        op
    }

    fn transition(
        &self,
        id: Uuid,
        next: OperationState,
        update: impl FnOnce(&mut AdminOperation),
    ) -> Result<AdminOperation, CostError> {
        let op = {
            let mut entry = self.ops.get_mut(&id).ok_or_else(|| CostError::NotFound {
                kind: "operation",
                name: id.to_string(),
            })?;
            if !entry.state.can_become(next) {
                return Err(CostError::Internal(format!(
                    "operation {id} cannot move from {} to {next}",
                    entry.state
                )));
            }
            let now = Utc::now();
            entry.state = next;
            entry.updated_at = now;
            if next.is_finished() {
                entry.finished_at = Some(now);
            }
            update(&mut *entry);
            entry.clone()
        };
        if next.is_finished() {
            cost_prometheus::record_admin_operation(op.kind.into(), next.into());
            self.retire(id);
        }
        Ok(op)
    }

    pub fn start(&self, id: Uuid) -> Result<AdminOperation, CostError> {
        self.transition(id, OperationState::Running, |op| {
            op.attempts += 1;
            op.error = None;
        })
    }

    pub fn complete(
        &self,
        id: Uuid,
        detail: Option<serde_json::Value>,
    ) -> Result<AdminOperation, CostError> {
        self.transition(id, OperationState::Completed, |op| op.detail = detail)
    }

    pub fn fail(&self, id: Uuid, error: &CostError) -> Result<AdminOperation, CostError> {
        let message = error.to_string();
        self.transition(id, OperationState::Failed, |op| op.error = Some(message))
    }

    /// Returns a running operation to `Pending` ahead of another attempt.
    pub fn requeue(&self, id: Uuid, error: &CostError) -> Result<AdminOperation, CostError> {
        let message = error.to_string();
        self.transition(id, OperationState::Pending, |op| op.error = Some(message))
    }

    fn retire(&self, id: Uuid) {
        let evicted: Vec<Uuid> = {
            let mut finished = self.finished.lock();
            finished.push_back(id);
            let excess = finished.len().saturating_sub(self.history);
            finished.drain(..excess).collect()
        };
        for old in evicted {
            self.ops.remove(&old);
        }
    }

    pub fn get(&self, id: Uuid) -> Option<AdminOperation> {
        self.ops.get(&id).map(|op| op.clone())
    }

    /// Every known operation, newest first.
    pub fn list(&self) -> Vec<AdminOperation> {
        let mut ops: Vec<AdminOperation> = self.ops.iter().map(|op| op.clone()).collect();
        ops.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        ops
    }

    /// Whether an unfinished operation of `kind` already spans `(range, filter)`.
    pub fn in_flight_covering(
        &self,
        kind: OperationKind,
        range: &TimeRange,
        filter: &DimensionFilter,
    ) -> bool {
        self.ops.iter().any(|op| {
            op.kind == kind
                && !op.state.is_finished()
                && op.range.covers(range)
                && filter.implies(&op.filter)
        })
    }
}
