// SPDX-FileCopyrightText: 2026 Cost Explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reimport sources.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{Months, NaiveDate};
use serde::Deserialize;
use tracing::debug;

use cost_core::{
    AdapterType, CostError, HealthStatus, PluginAdapter, ReimportSource, TimeRange, UsageRecord,
};

/// Which window a reimport covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case", tag = "window")]
pub enum ReimportWindow {
    /// The three days before today.
    Incremental,
    /// The fourteen months before today.
    Backfill,
    /// An explicit range.
    Range { range: TimeRange },
}

impl ReimportWindow {
    pub fn resolve(self, today: NaiveDate) -> Result<TimeRange, CostError> {
        let start = match self {
            ReimportWindow::Range { range } => return Ok(range),
            ReimportWindow::Incremental => today - chrono::Duration::days(3),
            ReimportWindow::Backfill => today
                .checked_sub_months(Months::new(14))
                .ok_or_else(|| CostError::Validation(format!("backfill from {today} underflows")))?,
        };
        let last = today
            .pred_opt()
            .ok_or_else(|| CostError::Validation(format!("date {today} is out of range")))?;
        TimeRange::from_dates(start, last)
    }
}

/// Newline-delimited JSON file of [`UsageRecord`]s.
///
/// The file is re-read on every fetch, so an external exporter can rewrite
/// it between reimports.
pub struct JsonLinesSource {
    name: String,
    path: PathBuf,
}

impl JsonLinesSource {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PluginAdapter for JsonLinesSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::ReimportSource
    }

    async fn health_check(&self) -> Result<HealthStatus, CostError> {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) if meta.is_file() => Ok(HealthStatus::Healthy),
            Ok(_) => Ok(HealthStatus::Unhealthy(format!(
                "{} is not a file",
                self.path.display()
            ))),
            Err(e) => Ok(HealthStatus::Unhealthy(format!(
                "{}: {e}",
                self.path.display()
            ))),
        }
    }

    async fn shutdown(&self) -> Result<(), CostError> {
        Ok(())
    }
}

#[async_trait]
impl ReimportSource for JsonLinesSource {
    async fn fetch(&self, range: &TimeRange) -> Result<Vec<UsageRecord>, CostError> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(CostError::storage)?;
        let mut records = Vec::new();
        for (line_no, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let record: UsageRecord = serde_json::from_str(line).map_err(|e| {
                CostError::Validation(format!(
                    "{}:{}: {e}",
                    self.path.display(),
                    line_no + 1
                ))
            })?;
            if range.contains(record.timestamp) {
                records.push(record);
            }
        }
        debug!(source = %self.name, range = %range, records = records.len(), "reimport source read");
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use chrono::{TimeZone, Utc};

    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn incremental_is_three_days_before_today() {
        let range = ReimportWindow::Incremental.resolve(date(2026, 3, 10)).unwrap();
        assert_eq!(range.start, Utc.with_ymd_and_hms(2026, 3, 7, 0, 0, 0).unwrap());
        assert_eq!(range.end, Utc.with_ymd_and_hms(2026, 3, 10, 0, 0, 0).unwrap());
    }

    #[test]
    fn backfill_spans_fourteen_months() {
        let range = ReimportWindow::Backfill.resolve(date(2026, 3, 10)).unwrap();
        assert_eq!(range.start, Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap());
    }

    #[test]
    fn window_deserializes_from_tag() {
        let window: ReimportWindow = serde_json::from_str(r#"{"window":"backfill"}"#).unwrap();
        assert_eq!(window, ReimportWindow::Backfill);
    }

    #[tokio::test]
    async fn fetch_filters_to_range_and_reports_bad_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"timestamp":"2026-03-08T10:00:00Z","dimensions":{{"user":"alice"}},"quantity":1,"unit_cost":2,"currency":"USD"}}"#
        )
        .unwrap();
        writeln!(file).unwrap();
        writeln!(
            file,
            r#"{{"timestamp":"2026-01-01T10:00:00Z","dimensions":{{"user":"bob"}},"quantity":1,"unit_cost":2,"currency":"USD"}}"#
        )
        .unwrap();
        let source = JsonLinesSource::new("export", file.path());
        let range = ReimportWindow::Incremental.resolve(date(2026, 3, 10)).unwrap();

        let records = source.fetch(&range).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].dimensions["user"], "alice");
        assert_eq!(source.health_check().await.unwrap(), HealthStatus::Healthy);

        writeln!(file, "not json").unwrap();
        let err = source.fetch(&range).await.unwrap_err();
        assert!(matches!(err, CostError::Validation(msg) if msg.contains(":4:")));
    }

    #[tokio::test]
    async fn missing_file_is_unhealthy() {
        let source = JsonLinesSource::new("gone", "/nonexistent/cost-export.jsonl");
        assert!(matches!(
            source.health_check().await.unwrap(),
            HealthStatus::Unhealthy(_)
        ));
        assert!(source.fetch(&ReimportWindow::Incremental.resolve(date(2026, 3, 10)).unwrap()).await.is_err());
    }
}
