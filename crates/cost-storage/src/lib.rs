// SPDX-FileCopyrightText: 2026 Cost Explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Append-only usage record store for the cost explorer.
//!
//! The [`RecordStore`] is the source of truth for raw usage records. Appends
//! are serialized through a single writer and persisted through a
//! [`RecordBackend`](cost_core::RecordBackend) before they become visible.
//! Scans read an in-memory `(timestamp, id)` index against a snapshot, so
//! they never block on appends and never observe later writes.

pub mod memory;
pub mod migrations;
pub mod policy;
pub mod sqlite;
pub mod store;

pub use memory::MemoryBackend;
pub use policy::IngestPolicy;
pub use sqlite::SqliteBackend;
pub use store::{RecordStore, ReplaceOutcome};

use std::sync::Arc;

use cost_config::model::{BackendKind, StorageConfig};
use cost_core::{CostError, RecordBackend};

/// Opens the backend selected by the storage configuration.
pub async fn open_backend(config: &StorageConfig) -> Result<Arc<dyn RecordBackend>, CostError> {
    match config.backend {
        BackendKind::Memory => Ok(Arc::new(MemoryBackend::new())),
        BackendKind::Sqlite => {
            if let Some(parent) = std::path::Path::new(&config.database_path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(CostError::storage)?;
                }
            }
            let backend = SqliteBackend::open(&config.database_path, config.wal_mode).await?;
            Ok(Arc::new(backend))
        }
    }
}
