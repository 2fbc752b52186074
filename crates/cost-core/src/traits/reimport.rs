// SPDX-FileCopyrightText: 2026 Cost Explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! External record sources used by admin reimports.

use async_trait::async_trait;

use crate::error::CostError;
use crate::time::TimeRange;
use crate::traits::adapter::PluginAdapter;
use crate::types::UsageRecord;

/// A named, already-normalized feed of usage records.
#[async_trait]
pub trait ReimportSource: PluginAdapter {
    /// Fetches every record the source holds inside `range`.
    async fn fetch(&self, range: &TimeRange) -> Result<Vec<UsageRecord>, CostError>;
}
