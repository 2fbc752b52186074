// SPDX-FileCopyrightText: 2026 Cost Explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `server serve`: runs the HTTP gateway until a shutdown signal arrives.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use cost_config::CostExplorerConfig;
use cost_core::CostError;
use cost_gateway::{HealthState, bind, start_server};
use cost_prometheus::PrometheusAdapter;

use crate::app::App;
use crate::{demo, shutdown};

/// Options for `server serve`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServeOptions {
    /// Seed synthetic usage before accepting requests.
    pub demo: bool,
}

/// Runs the server until SIGINT/SIGTERM, then drains and closes the store.
pub async fn run_serve(config: CostExplorerConfig, options: ServeOptions) -> Result<(), CostError> {
    init_tracing(&config.server.log_level);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        admin = cfg!(feature = "admin"),
        "starting cost explorer server"
    );

    let cancel = shutdown::install_signal_handler();

    // The recorder must exist before the store opens so its gauges land.
    let prometheus = if config.metrics.enabled {
        match PrometheusAdapter::new() {
            Ok(adapter) => {
                info!("prometheus metrics enabled");
                Some(Arc::new(adapter))
            }
            Err(e) => {
                warn!(error = %e, "prometheus initialization failed, continuing without metrics");
                None
            }
        }
    } else {
        debug!("prometheus metrics disabled by configuration");
        None
    };

    let host = config.server.host.clone();
    let port = config.server.port;
    let app = App::build(config, &cancel).await?;

    if options.demo {
        demo::seed(&app.store, Utc::now()).await?;
    }

    let health = HealthState {
        prometheus_render: prometheus.map(|adapter| {
            let render: Arc<dyn Fn() -> String + Send + Sync> = Arc::new(move || adapter.render());
            render
        }),
        ..HealthState::default()
    };
    let router = app.router(health);
    let tasks = app.spawn_background(&cancel);

    let served = match bind(&host, port).await {
        Ok(listener) => start_server(listener, router, cancel.clone()).await,
        Err(e) => Err(e),
    };
    if let Err(e) = &served {
        error!(error = %e, "gateway stopped with an error");
    }

    cancel.cancel();
    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "background task panicked");
        }
    }
    app.shutdown().await?;
    info!("cost explorer server stopped");
    served
}

/// Initializes the tracing subscriber with the given log level.
///
/// `RUST_LOG` takes precedence when set.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "cost_explorer={log_level},server={log_level},cost_core={log_level},\
             cost_storage={log_level},cost_engine={log_level},cost_admin={log_level},\
             cost_gateway={log_level},cost_prometheus={log_level},warn"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}
