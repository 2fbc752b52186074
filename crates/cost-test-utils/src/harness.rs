// SPDX-FileCopyrightText: 2026 Cost Explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness wiring a record store, aggregation engine, and planner.
//!
//! The engine reads the store through a [`ControlledSource`], so tests can
//! inject scan failures or pause recomputes without touching the store.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use cost_config::CostExplorerConfig;
use cost_config::model::BackendKind;
use cost_core::{AppendListener, CostError, RecordBackend, RecordId, RecordSource, UsageRecord};
use cost_engine::{AggregationEngine, EngineOptions, QueryPlanner};
use cost_storage::{IngestPolicy, MemoryBackend, RecordStore, open_backend};

use crate::controlled_source::ControlledSource;

/// Builder for [`TestHarness`].
pub struct TestHarnessBuilder {
    config: CostExplorerConfig,
    backend: Option<Arc<dyn RecordBackend>>,
    hydrate: bool,
    sqlite: bool,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        Self {
            config: CostExplorerConfig::default(),
            backend: None,
            hydrate: true,
            sqlite: false,
        }
    }

    /// Replaces the whole configuration.
    pub fn with_config(mut self, config: CostExplorerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the planner's cell cap.
    pub fn with_max_cells(mut self, max_cells: u64) -> Self {
        self.config.query.max_cells = max_cells;
        self
    }

    /// Uses `backend` instead of a fresh in-memory one.
    pub fn with_backend(mut self, backend: Arc<dyn RecordBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Persists records to a SQLite file in a temp directory.
    pub fn with_sqlite(mut self) -> Self {
        self.sqlite = true;
        self
    }

    /// Skips the startup rebuild so queries exercise fallback scans.
    pub fn lazy(mut self) -> Self {
        self.hydrate = false;
        self
    }

    pub async fn build(mut self) -> Result<TestHarness, CostError> {
        let temp_dir = tempfile::TempDir::new().map_err(CostError::storage)?;
        let backend = match (self.backend.take(), self.sqlite) {
            (Some(backend), _) => backend,
            (None, true) => {
                self.config.storage.backend = BackendKind::Sqlite;
                self.config.storage.database_path =
                    temp_dir.path().join("records.db").display().to_string();
                open_backend(&self.config.storage).await?
            }
            (None, false) => Arc::new(MemoryBackend::new()),
        };

        let store = Arc::new(
            RecordStore::open(IngestPolicy::new(self.config.ingest.currency.clone()), backend)
                .await?
                .with_scan_page_size(self.config.aggregation.scan_page_size),
        );
        let source = Arc::new(ControlledSource::new(
            Arc::clone(&store) as Arc<dyn RecordSource>
        ));
        let engine = Arc::new(AggregationEngine::new(
            Arc::clone(&source) as Arc<dyn RecordSource>,
            EngineOptions::from_config(&self.config.aggregation),
        ));
        if self.hydrate {
            engine.hydrate(&CancellationToken::new()).await?;
        }
        let listener: Arc<dyn AppendListener> = Arc::clone(&engine) as Arc<dyn AppendListener>;
        store.subscribe(&listener);
        let planner = Arc::new(QueryPlanner::from_config(Arc::clone(&engine), &self.config));

        Ok(TestHarness {
            store,
            source,
            engine,
            planner,
            config: self.config,
            _temp_dir: temp_dir,
        })
    }
}

/// A wired store, engine, and planner over temp storage.
pub struct TestHarness {
    pub store: Arc<RecordStore>,
    /// The engine's view of the store.
    pub source: Arc<ControlledSource>,
    pub engine: Arc<AggregationEngine>,
    pub planner: Arc<QueryPlanner>,
    pub config: CostExplorerConfig,
    /// Kept alive so the SQLite file outlives the harness.
    _temp_dir: tempfile::TempDir,
}

impl TestHarness {
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// Default harness: in-memory backend, hydrated engine.
    pub async fn new() -> Result<Self, CostError> {
        Self::builder().build().await
    }

    pub async fn ingest(&self, records: Vec<UsageRecord>) -> Result<Vec<RecordId>, CostError> {
        self.store.append_batch(records).await
    }
}
