// SPDX-FileCopyrightText: 2026 Cost Explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A [`RecordSource`] wrapper that can fail or pause scans.
//!
//! Used to drive recomputes into their error and cancellation paths, and to
//! hold a recompute mid-scan while a test appends records underneath it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore};

use cost_core::{
    CostError, DimensionFilter, RecordSource, ScanCursor, ScanPage, Snapshot, TimeRange,
};

pub struct ControlledSource {
    inner: Arc<dyn RecordSource>,
    failing: AtomicBool,
    pages: AtomicUsize,
    gate: Mutex<Option<Arc<Semaphore>>>,
    blocked: Notify,
}

impl ControlledSource {
    pub fn new(inner: Arc<dyn RecordSource>) -> Self {
        Self {
            inner,
            failing: AtomicBool::new(false),
            pages: AtomicUsize::new(0),
            gate: Mutex::new(None),
            blocked: Notify::new(),
        }
    }

    /// Makes every following page read fail with a storage error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Page reads attempted so far, including failed ones.
    pub fn pages_read(&self) -> usize {
        self.pages.load(Ordering::SeqCst)
    }

    /// Holds every following page read until [`open_gate`](Self::open_gate).
    pub fn close_gate(&self) {
        *self.gate.lock() = Some(Arc::new(Semaphore::new(0)));
    }

    /// Releases held and future page reads.
    pub fn open_gate(&self) {
        if let Some(gate) = self.gate.lock().take() {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    /// Resolves once a page read is held at the gate.
    pub async fn wait_blocked(&self) {
        self.blocked.notified().await;
    }
}

#[async_trait]
impl RecordSource for ControlledSource {
    fn snapshot(&self) -> Snapshot {
        self.inner.snapshot()
    }

    fn time_bounds(&self) -> Option<TimeRange> {
        self.inner.time_bounds()
    }

    async fn scan_page(
        &self,
        snapshot: &Snapshot,
        range: &TimeRange,
        filter: &DimensionFilter,
        after: Option<ScanCursor>,
        limit: usize,
    ) -> Result<ScanPage, CostError> {
        self.pages.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            self.blocked.notify_one();
            gate.acquire()
                .await
                .map_err(|e| CostError::Internal(e.to_string()))?
                .forget();
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(CostError::storage(std::io::Error::other(
                "injected scan failure",
            )));
        }
        self.inner
            .scan_page(snapshot, range, filter, after, limit)
            .await
    }
}
