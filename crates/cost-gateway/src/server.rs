// SPDX-FileCopyrightText: 2026 Cost Explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway HTTP server built on axum.
//!
//! Sets up routes, middleware, and shared state for the gateway.

use std::sync::Arc;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use chrono::{NaiveDate, Utc};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use cost_core::CostError;
use cost_engine::QueryPlanner;
use cost_storage::RecordStore;

use crate::auth::{AuthConfig, auth_middleware};
use crate::handlers;

/// Source of the current date for period shortcuts.
pub type Clock = Arc<dyn Fn() -> NaiveDate + Send + Sync>;

/// Health state for unauthenticated health/metrics endpoints.
#[derive(Clone)]
pub struct HealthState {
    /// Process start time for uptime calculation.
    pub start_time: std::time::Instant,
    /// Optional Prometheus metrics render function.
    pub prometheus_render: Option<Arc<dyn Fn() -> String + Send + Sync>>,
}

impl Default for HealthState {
    fn default() -> Self {
        Self {
            start_time: std::time::Instant::now(),
            prometheus_render: None,
        }
    }
}

/// Shared state for axum request handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub store: Arc<RecordStore>,
    pub planner: Arc<QueryPlanner>,
    /// Bearer-token principals.
    pub auth: AuthConfig,
    /// Health state for unauthenticated endpoints.
    pub health: HealthState,
    pub clock: Clock,
    /// Admin capability; the admin routes are only mounted when present.
    #[cfg(feature = "admin")]
    pub admin: Option<Arc<cost_admin::AdminController>>,
}

impl GatewayState {
    pub fn new(store: Arc<RecordStore>, planner: Arc<QueryPlanner>, auth: AuthConfig) -> Self {
        Self {
            store,
            planner,
            auth,
            health: HealthState::default(),
            clock: Arc::new(|| Utc::now().date_naive()),
            #[cfg(feature = "admin")]
            admin: None,
        }
    }

    pub fn with_health(mut self, health: HealthState) -> Self {
        self.health = health;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    #[cfg(feature = "admin")]
    pub fn with_admin(mut self, admin: Arc<cost_admin::AdminController>) -> Self {
        self.admin = Some(admin);
        self
    }

    pub fn today(&self) -> NaiveDate {
        (self.clock)()
    }
}

/// Builds the full router, mounted under `base_path`.
///
/// - GET /health, GET /metrics (no auth)
/// - POST /v1/records, POST /v1/query (auth)
/// - GET /v1/costs/daily, /v1/costs/monthly, /v1/costs/by/{dimension} (auth)
/// - /admin/* (auth, admin principals, admin build only)
pub fn build_router(state: GatewayState, base_path: &str) -> Router {
    let auth_state = state.auth.clone();

    // Unauthenticated public routes (health + metrics for systemd and Prometheus).
    let public_routes = Router::new()
        .route("/health", get(handlers::get_public_health))
        .route("/metrics", get(handlers::get_public_metrics));

    // Routes requiring authentication.
    let api_routes = Router::new()
        .route("/v1/records", post(handlers::post_records))
        .route("/v1/query", post(handlers::post_query))
        .route("/v1/costs/daily", get(handlers::get_daily))
        .route("/v1/costs/monthly", get(handlers::get_monthly))
        .route("/v1/costs/by/{dimension}", get(handlers::get_cost_by));

    #[cfg(feature = "admin")]
    let api_routes = if state.admin.is_some() {
        api_routes.merge(crate::admin::routes())
    } else {
        api_routes
    };

    let api_routes =
        api_routes.route_layer(axum_middleware::from_fn_with_state(auth_state, auth_middleware));

    let app = Router::new()
        .merge(public_routes)
        .merge(api_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let base = base_path.trim_matches('/');
    if base.is_empty() {
        app
    } else {
        Router::new().nest(&format!("/{base}"), app)
    }
}

/// Binds the listener for `host:port`.
pub async fn bind(host: &str, port: u16) -> Result<TcpListener, CostError> {
    let addr = format!("{host}:{port}");
    TcpListener::bind(&addr)
        .await
        .map_err(|e| CostError::Config(format!("failed to bind gateway to {addr}: {e}")))
}

/// Serves `router` until `shutdown` is cancelled.
pub async fn start_server(
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
) -> Result<(), CostError> {
    let addr = listener
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "<unknown>".to_string());
    tracing::info!("gateway server listening on {addr}");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| CostError::Internal(format!("gateway server error: {e}")))?;

    tracing::info!("gateway server stopped");
    Ok(())
}
