// SPDX-FileCopyrightText: 2026 Cost Explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Record and range builders shared by integration tests.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use cost_core::{TimeRange, UsageRecord};

/// `YYYY-MM-DD HH:00:00 UTC`.
pub fn hour(year: i32, month: u32, day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, 0, 0)
        .single()
        .unwrap_or_else(|| panic!("invalid fixture time {year}-{month}-{day} {hour}:00"))
}

/// Half-open range between two instants.
pub fn range(start: DateTime<Utc>, end: DateTime<Utc>) -> TimeRange {
    TimeRange::new(start, end).unwrap_or_else(|e| panic!("invalid fixture range: {e}"))
}

/// A USD record with quantity 1 so that `cost == unit_cost`.
pub fn usage(timestamp: DateTime<Utc>, dimensions: &[(&str, &str)], unit_cost: f64) -> UsageRecord {
    UsageRecord {
        timestamp,
        dimensions: dimensions
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<BTreeMap<_, _>>(),
        quantity: 1.0,
        unit_cost,
        currency: "USD".to_string(),
    }
}

/// `usage` with the given quantity.
pub fn usage_qty(
    timestamp: DateTime<Utc>,
    dimensions: &[(&str, &str)],
    quantity: f64,
    unit_cost: f64,
) -> UsageRecord {
    UsageRecord {
        quantity,
        ..usage(timestamp, dimensions, unit_cost)
    }
}
