// SPDX-FileCopyrightText: 2026 Cost Explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Assembles the running system from a validated configuration.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cost_config::CostExplorerConfig;
use cost_core::{AppendListener, CostError, RecordBackend, RecordSource};
use cost_engine::{AggregationEngine, EngineOptions, QueryPlanner};
use cost_gateway::{AuthConfig, GatewayState, HealthState, build_router};
use cost_storage::{IngestPolicy, RecordStore};

use crate::background;

/// Interval of the gauge and compaction loop.
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(15);

/// The wired store, engine, planner, and admin capability.
pub struct App {
    pub config: CostExplorerConfig,
    pub store: Arc<RecordStore>,
    pub engine: Arc<AggregationEngine>,
    pub planner: Arc<QueryPlanner>,
    #[cfg(feature = "admin")]
    pub admin: Arc<cost_admin::AdminController>,
}

impl App {
    /// Opens the configured backend and wires everything on top of it.
    pub async fn build(
        config: CostExplorerConfig,
        cancel: &CancellationToken,
    ) -> Result<Self, CostError> {
        let backend = cost_storage::open_backend(&config.storage).await?;
        Self::with_backend(config, backend, cancel).await
    }

    /// Like [`App::build`] over an already opened backend.
    pub async fn with_backend(
        config: CostExplorerConfig,
        backend: Arc<dyn RecordBackend>,
        cancel: &CancellationToken,
    ) -> Result<Self, CostError> {
        let store = Arc::new(
            RecordStore::open(IngestPolicy::from_config(&config.ingest), backend)
                .await?
                .with_scan_page_size(config.aggregation.scan_page_size),
        );
        let engine = Arc::new(AggregationEngine::new(
            Arc::clone(&store) as Arc<dyn RecordSource>,
            EngineOptions::from_config(&config.aggregation),
        ));

        if config.aggregation.hydrate_on_start {
            match engine.hydrate(cancel).await {
                Ok(_) => {}
                Err(CostError::Overflow(what)) => {
                    warn!(%what, "hydration overflowed, serving uncovered ranges from raw scans");
                }
                Err(e) => return Err(e),
            }
        } else {
            info!("hydration disabled, queries scan raw records until cells are built");
        }
        let listener: Arc<dyn AppendListener> = Arc::clone(&engine) as Arc<dyn AppendListener>;
        store.subscribe(&listener);

        let planner = QueryPlanner::from_config(Arc::clone(&engine), &config);

        #[cfg(feature = "admin")]
        let (planner, admin) = {
            let admin = Arc::new(cost_admin::AdminController::new(
                Arc::clone(&store),
                Arc::clone(&engine),
                &config.admin,
            ));
            info!(sources = ?admin.source_names(), "admin controller enabled");
            let hook: Arc<dyn cost_engine::StaleCellHook> = admin.clone();
            (planner.with_stale_hook(hook), admin)
        };

        if config.server.principals.is_empty() {
            warn!("no principals configured, every API request will be rejected");
        }

        Ok(Self {
            store,
            engine,
            planner: Arc::new(planner),
            #[cfg(feature = "admin")]
            admin,
            config,
        })
    }

    /// HTTP router over this app's components.
    pub fn router(&self, health: HealthState) -> Router {
        let auth = AuthConfig::from_principals(&self.config.server.principals);
        let state = GatewayState::new(Arc::clone(&self.store), Arc::clone(&self.planner), auth)
            .with_health(health);
        #[cfg(feature = "admin")]
        let state = state.with_admin(Arc::clone(&self.admin));
        build_router(state, &self.config.server.base_path)
    }

    /// Starts the retention sweeper and the housekeeping loop.
    ///
    /// Both stop when `cancel` fires; await the handles before
    /// [`App::shutdown`].
    pub fn spawn_background(&self, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::new();

        match self.config.retention.max_age_days {
            Some(days) => {
                let store = Arc::clone(&self.store);
                let engine = Arc::clone(&self.engine);
                let max_age = chrono::Duration::days(i64::from(days));
                let every = Duration::from_secs(self.config.retention.sweep_interval_secs);
                let cancel = cancel.clone();
                tasks.push(tokio::spawn(async move {
                    background::retention_sweeper(store, engine, max_age, every, cancel).await;
                }));
            }
            None => debug!("retention disabled by configuration"),
        }

        let store = Arc::clone(&self.store);
        let engine = Arc::clone(&self.engine);
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            background::housekeeping(store, engine, HOUSEKEEPING_INTERVAL, cancel).await;
        }));

        tasks
    }

    /// Stops admin work, then closes the store.
    pub async fn shutdown(&self) -> Result<(), CostError> {
        #[cfg(feature = "admin")]
        self.admin.shutdown().await;
        self.store.close().await
    }
}
