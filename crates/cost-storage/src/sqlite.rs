// SPDX-FileCopyrightText: 2026 Cost Explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementation of [`RecordBackend`].
//!
//! All writes are serialized through tokio-rusqlite's single background
//! thread. Do NOT open additional connections for writes.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use tokio_rusqlite::Connection;
use tracing::debug;

use cost_core::{
    AdapterType, CostError, HealthStatus, PluginAdapter, RecordBackend, RecordId, UsageRecord,
    WriteBatch,
};

use crate::migrations::run_migrations;

/// Convert a tokio-rusqlite error into `CostError::Storage`.
pub(crate) fn map_tr_err(e: tokio_rusqlite::Error<rusqlite::Error>) -> CostError {
    CostError::Storage {
        source: Box::new(e),
    }
}

/// Durable record backend over a single SQLite table.
pub struct SqliteBackend {
    conn: Connection,
    path: String,
}

impl SqliteBackend {
    /// Opens (creating if needed) the database at `path` and applies migrations.
    pub async fn open(path: &str, wal_mode: bool) -> Result<Self, CostError> {
        let conn = Connection::open(path).await.map_err(CostError::storage)?;
        let backend = Self {
            conn,
            path: path.to_string(),
        };
        backend.prepare(wal_mode).await?;
        debug!(path, wal_mode, "SQLite record backend opened");
        Ok(backend)
    }

    /// Opens a private in-memory database.
    pub async fn open_in_memory() -> Result<Self, CostError> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(CostError::storage)?;
        let backend = Self {
            conn,
            path: ":memory:".to_string(),
        };
        backend.prepare(false).await?;
        Ok(backend)
    }

    async fn prepare(&self, wal_mode: bool) -> Result<(), CostError> {
        self.conn
            .call(move |conn| -> Result<(), rusqlite::Error> {
                if wal_mode {
                    let mode: String = conn.pragma_update_and_check(
                        None,
                        "journal_mode",
                        "WAL",
                        |row| row.get(0),
                    )?;
                    debug!(mode, "journal mode set");
                    conn.pragma_update(None, "synchronous", "NORMAL")?;
                }
                conn.busy_timeout(Duration::from_secs(5))
            })
            .await
            .map_err(map_tr_err)?;

        self.conn
            .call(|conn| Ok::<_, rusqlite::Error>(run_migrations(conn)))
            .await
            .map_err(map_tr_err)?
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

fn to_sql_err(e: serde_json::Error) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(Box::new(e))
}

fn parse_row(row: &rusqlite::Row<'_>) -> Result<(RecordId, UsageRecord), rusqlite::Error> {
    let id: i64 = row.get(0)?;
    let ts: String = row.get(1)?;
    let dimensions: String = row.get(2)?;
    let timestamp = DateTime::parse_from_rfc3339(&ts)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?
        .with_timezone(&Utc);
    let dimensions: BTreeMap<String, String> = serde_json::from_str(&dimensions)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;
    Ok((
        RecordId(id as u64),
        UsageRecord {
            timestamp,
            dimensions,
            quantity: row.get(3)?,
            unit_cost: row.get(4)?,
            currency: row.get(5)?,
        },
    ))
}

#[async_trait]
impl PluginAdapter for SqliteBackend {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Backend
    }

    async fn health_check(&self) -> Result<HealthStatus, CostError> {
        self.conn
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("SELECT 1;")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), CostError> {
        self.conn
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        debug!("shutdown: WAL checkpoint complete");
        Ok(())
    }
}

#[async_trait]
impl RecordBackend for SqliteBackend {
    async fn commit(&self, batch: WriteBatch) -> Result<(), CostError> {
        if batch.is_empty() {
            return Ok(());
        }
        let (appended, removed) = (batch.appended.len(), batch.removed.len());
        self.conn
            .call(move |conn| -> Result<(), rusqlite::Error> {
                let tx = conn.transaction()?;
                {
                    let mut delete = tx.prepare_cached("DELETE FROM usage_records WHERE id = ?1")?;
                    for id in &batch.removed {
                        delete.execute([id.0 as i64])?;
                    }
                    let mut insert = tx.prepare_cached(
                        "INSERT INTO usage_records (id, ts, dimensions, quantity, unit_cost, currency) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    )?;
                    for stored in &batch.appended {
                        let record = &stored.record;
                        insert.execute(rusqlite::params![
                            stored.id.0 as i64,
                            record.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
                            serde_json::to_string(&record.dimensions).map_err(to_sql_err)?,
                            record.quantity,
                            record.unit_cost,
                            record.currency,
                        ])?;
                    }
                }
                tx.commit()
            })
            .await
            .map_err(map_tr_err)?;
        debug!(appended, removed, "record batch committed");
        Ok(())
    }

    async fn load(&self) -> Result<Vec<(RecordId, UsageRecord)>, CostError> {
        self.conn
            .call(|conn| -> Result<_, rusqlite::Error> {
                let mut stmt = conn.prepare(
                    "SELECT id, ts, dimensions, quantity, unit_cost, currency \
                     FROM usage_records ORDER BY id",
                )?;
                let rows = stmt
                    .query_map([], parse_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(map_tr_err)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeZone;
    use cost_core::{DimensionKey, StoredRecord};
    use rust_decimal::Decimal;
    use tempfile::tempdir;

    use super::*;

    fn stored(id: u64, hour: u32) -> Arc<StoredRecord> {
        let record = UsageRecord {
            timestamp: Utc.with_ymd_and_hms(2026, 2, 3, hour, 15, 0).unwrap(),
            dimensions: BTreeMap::from([
                ("model".to_string(), "large".to_string()),
                ("user".to_string(), "alice".to_string()),
            ]),
            quantity: 1.5,
            unit_cost: 2.0,
            currency: "USD".to_string(),
        };
        Arc::new(StoredRecord::new(
            RecordId(id),
            record,
            DimensionKey::from_pairs([("model", "large"), ("user", "alice")]),
            Decimal::new(3, 0),
        ))
    }

    #[tokio::test]
    async fn commit_then_load_preserves_records() {
        let backend = SqliteBackend::open_in_memory().await.unwrap();
        backend
            .commit(WriteBatch::append(vec![stored(1, 0), stored(2, 5)]))
            .await
            .unwrap();

        let loaded = backend.load().await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].0, RecordId(1));
        assert_eq!(loaded[1].1, stored(2, 5).record);
    }

    #[tokio::test]
    async fn removals_and_appends_land_together() {
        let backend = SqliteBackend::open_in_memory().await.unwrap();
        backend
            .commit(WriteBatch::append(vec![stored(1, 0), stored(2, 1)]))
            .await
            .unwrap();
        backend
            .commit(WriteBatch {
                appended: vec![stored(3, 2)],
                removed: vec![RecordId(1)],
            })
            .await
            .unwrap();

        let ids: Vec<_> = backend.load().await.unwrap().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![RecordId(2), RecordId(3)]);
    }

    #[tokio::test]
    async fn duplicate_id_rolls_back_whole_batch() {
        let backend = SqliteBackend::open_in_memory().await.unwrap();
        backend.commit(WriteBatch::append(vec![stored(1, 0)])).await.unwrap();

        let result = backend
            .commit(WriteBatch::append(vec![stored(2, 0), stored(1, 0)]))
            .await;
        assert!(matches!(result, Err(CostError::Storage { .. })));
        assert_eq!(backend.load().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn file_database_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.db");
        let path = path.to_str().unwrap();
        {
            let backend = SqliteBackend::open(path, true).await.unwrap();
            backend.commit(WriteBatch::append(vec![stored(7, 3)])).await.unwrap();
            backend.shutdown().await.unwrap();
        }
        let backend = SqliteBackend::open(path, true).await.unwrap();
        assert_eq!(backend.load().await.unwrap()[0].0, RecordId(7));
        assert_eq!(backend.health_check().await.unwrap(), HealthStatus::Healthy);
    }
}
