// SPDX-FileCopyrightText: 2026 Cost Explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Synthetic usage for `server serve --demo`.
//!
//! Generates a deterministic spread of model usage across a handful of
//! users and services so the dashboard views have something to show.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use cost_core::{CostError, UsageRecord};
use cost_storage::RecordStore;

const USERS: [&str; 3] = ["alice@example.com", "bob@example.com", "charlie@example.com"];

/// `(model, price per thousand tokens)`.
const MODELS: [(&str, f64); 4] = [
    ("claude-3-opus", 0.015),
    ("claude-3-sonnet", 0.003),
    ("claude-3-haiku", 0.00025),
    ("claude-3.5-sonnet", 0.003),
];

const SERVICES: [&str; 2] = ["api", "console"];

/// Days of history seeded by [`seed`].
pub const DEMO_DAYS: i64 = 180;

const SEED: u64 = 0x00c0_57ee;

/// One record per user and model for each of the `days` days before `now`.
///
/// Every timestamp is strictly before `now`. The same inputs always produce
/// the same records.
pub fn generate(now: DateTime<Utc>, days: i64, currency: &str) -> Vec<UsageRecord> {
    let mut rng = StdRng::seed_from_u64(SEED);
    let mut records = Vec::with_capacity((days.max(0) as usize) * USERS.len() * MODELS.len());
    for day in 1..=days {
        let day_start = now - Duration::days(day);
        for (u, user) in USERS.iter().enumerate() {
            for (model, price) in MODELS {
                // Heavier users burn proportionally more tokens.
                let thousands: f64 = rng.gen_range(5.0..60.0) * (u as f64 + 1.0);
                let offset = Duration::minutes(rng.gen_range(0..24 * 60));
                let service = SERVICES[rng.gen_range(0..SERVICES.len())];
                records.push(UsageRecord {
                    timestamp: day_start + offset,
                    dimensions: BTreeMap::from([
                        ("user".to_string(), (*user).to_string()),
                        ("model".to_string(), model.to_string()),
                        ("service".to_string(), service.to_string()),
                    ]),
                    quantity: thousands.round(),
                    unit_cost: price,
                    currency: currency.to_string(),
                });
            }
        }
    }
    records.sort_by_key(|r| r.timestamp);
    records
}

/// Appends [`DEMO_DAYS`] of synthetic usage to `store`.
///
/// Returns how many records were written.
pub async fn seed(store: &RecordStore, now: DateTime<Utc>) -> Result<usize, CostError> {
    let records = generate(now, DEMO_DAYS, store.policy().currency());
    let ids = store.append_batch(records).await?;
    tracing::info!(records = ids.len(), days = DEMO_DAYS, "demo usage seeded");
    Ok(ids.len())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 20, 9, 30, 0).unwrap()
    }

    #[test]
    fn generates_every_user_and_model_per_day() {
        let records = generate(now(), 7, "USD");
        assert_eq!(records.len(), 7 * USERS.len() * MODELS.len());
        assert!(records.iter().all(|r| r.timestamp < now()));
        assert!(records.iter().all(|r| r.timestamp >= now() - Duration::days(7)));
        assert!(records.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn generation_is_deterministic() {
        assert_eq!(generate(now(), 3, "USD"), generate(now(), 3, "USD"));
    }

    #[test]
    fn records_are_valid() {
        for record in generate(now(), 2, "EUR") {
            assert_eq!(record.currency, "EUR");
            assert!(record.quantity >= 0.0);
            assert!(record.cost().is_ok());
            assert_eq!(record.dimensions.len(), 3);
        }
    }
}
