// SPDX-FileCopyrightText: 2026 Cost Explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ingestion acceptance rules.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

use cost_config::model::IngestConfig;
use cost_core::{CostError, UsageRecord};

/// Decides whether a usage record may enter the store.
#[derive(Debug, Clone)]
pub struct IngestPolicy {
    currency: String,
    max_age: Option<Duration>,
    max_future_skew: Duration,
    max_record_cost: Decimal,
}

/// Ceiling on a single record's cost when none is configured.
const DEFAULT_MAX_RECORD_COST: i64 = 1_000_000_000_000;

impl IngestPolicy {
    /// Accepts any timestamp up to five minutes in the future and any cost up
    /// to one trillion currency units.
    pub fn new(currency: impl Into<String>) -> Self {
        Self {
            currency: currency.into(),
            max_age: None,
            max_future_skew: Duration::minutes(5),
            max_record_cost: Decimal::from(DEFAULT_MAX_RECORD_COST),
        }
    }

    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            currency: config.currency.clone(),
            max_age: Some(Duration::days(i64::from(config.max_age_days))),
            max_future_skew: Duration::seconds(
                i64::try_from(config.max_future_skew_secs)
                    .unwrap_or(i64::MAX)
                    .min(i64::MAX / 1000),
            ),
            max_record_cost: Decimal::try_from(config.max_record_cost)
                .ok()
                .filter(|ceiling| ceiling.is_sign_positive() && !ceiling.is_zero())
                .unwrap_or(Decimal::from(DEFAULT_MAX_RECORD_COST)),
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn with_max_record_cost(mut self, ceiling: Decimal) -> Self {
        self.max_record_cost = ceiling;
        self
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Validates `record` at time `now` and returns its exact cost.
    ///
    /// On rejection the error is paired with a short reason label for metrics.
    pub fn check(
        &self,
        record: &UsageRecord,
        now: DateTime<Utc>,
    ) -> Result<Decimal, (&'static str, CostError)> {
        let reject = |reason, message: String| Err((reason, CostError::Validation(message)));

        if let Some(max_age) = self.max_age
            && now
                .checked_sub_signed(max_age)
                .is_some_and(|oldest| record.timestamp < oldest)
        {
            return reject(
                "too_old",
                format!(
                    "timestamp {} is older than the ingestion window of {} days",
                    record.timestamp,
                    max_age.num_days()
                ),
            );
        }
        if now
            .checked_add_signed(self.max_future_skew)
            .is_some_and(|latest| record.timestamp > latest)
        {
            return reject(
                "future",
                format!("timestamp {} is in the future", record.timestamp),
            );
        }
        if !record.quantity.is_finite() || record.quantity < 0.0 {
            return reject(
                "quantity",
                format!("quantity must be finite and non-negative, got {}", record.quantity),
            );
        }
        if !record.unit_cost.is_finite() || record.unit_cost < 0.0 {
            return reject(
                "unit_cost",
                format!(
                    "unit_cost must be finite and non-negative, got {}",
                    record.unit_cost
                ),
            );
        }
        if record.currency != self.currency {
            return reject(
                "currency",
                format!(
                    "currency `{}` does not match the configured `{}`",
                    record.currency, self.currency
                ),
            );
        }
        if record.dimensions.is_empty() {
            return reject("dimensions", "record has no dimensions".to_string());
        }
        if let Some((name, _)) = record
            .dimensions
            .iter()
            .find(|(name, value)| name.is_empty() || value.is_empty())
        {
            return reject(
                "dimensions",
                format!("dimension `{name}` has an empty name or value"),
            );
        }
        let cost = record.cost().map_err(|e| ("overflow", e))?;
        if cost > self.max_record_cost {
            return reject(
                "too_expensive",
                format!(
                    "cost {cost} exceeds the per-record ceiling of {}",
                    self.max_record_cost
                ),
            );
        }
        Ok(cost)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::TimeZone;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
    }

    fn record() -> UsageRecord {
        UsageRecord {
            timestamp: now() - Duration::hours(1),
            dimensions: BTreeMap::from([("service".to_string(), "compute".to_string())]),
            quantity: 4.0,
            unit_cost: 0.5,
            currency: "USD".to_string(),
        }
    }

    fn reason(policy: &IngestPolicy, record: &UsageRecord) -> &'static str {
        policy.check(record, now()).unwrap_err().0
    }

    #[test]
    fn accepts_valid_record() {
        assert_eq!(
            IngestPolicy::new("USD").check(&record(), now()).unwrap(),
            Decimal::new(2, 0)
        );
    }

    #[test]
    fn rejects_outside_window() {
        let policy = IngestPolicy::new("USD").with_max_age(Duration::days(30));
        let mut old = record();
        old.timestamp = now() - Duration::days(31);
        assert_eq!(reason(&policy, &old), "too_old");

        let mut future = record();
        future.timestamp = now() + Duration::hours(1);
        assert_eq!(reason(&policy, &future), "future");
    }

    #[test]
    fn rejects_bad_amounts() {
        let policy = IngestPolicy::new("USD");
        let mut r = record();
        r.quantity = -1.0;
        assert_eq!(reason(&policy, &r), "quantity");
        let mut r = record();
        r.unit_cost = f64::NAN;
        assert_eq!(reason(&policy, &r), "unit_cost");
    }

    #[test]
    fn rejects_costs_above_the_ceiling() {
        let mut r = record();
        r.quantity = 1e14;
        r.unit_cost = 5e14;
        assert_eq!(reason(&IngestPolicy::new("USD"), &r), "too_expensive");

        let policy = IngestPolicy::new("USD").with_max_record_cost(Decimal::new(1, 0));
        assert_eq!(reason(&policy, &record()), "too_expensive");

        let mut at_ceiling = record();
        at_ceiling.quantity = 2.0;
        at_ceiling.unit_cost = 0.5;
        assert_eq!(policy.check(&at_ceiling, now()).unwrap(), Decimal::new(1, 0));
    }

    #[test]
    fn rejects_foreign_currency() {
        let mut r = record();
        r.currency = "EUR".into();
        assert_eq!(reason(&IngestPolicy::new("USD"), &r), "currency");
    }

    #[test]
    fn rejects_empty_dimensions() {
        let policy = IngestPolicy::new("USD");
        let mut r = record();
        r.dimensions.clear();
        assert_eq!(reason(&policy, &r), "dimensions");
        let mut r = record();
        r.dimensions.insert("region".into(), String::new());
        assert_eq!(reason(&policy, &r), "dimensions");
    }
}
