// SPDX-FileCopyrightText: 2026 Cost Explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP request handlers for the gateway REST API.
//!
//! Handles POST /v1/records, POST /v1/query, the GET /v1/costs/* views, and
//! the unauthenticated GET /health and GET /metrics.

use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use cost_core::{
    CostBreakdown, CostError, DimensionFilter, HealthStatus, Period, QuerySpec,
    RecordId, UsageRecord,
};

use crate::auth::Principal;
use crate::error::ApiError;
use crate::server::GatewayState;

/// Response body for POST /v1/records.
#[derive(Debug, Serialize, Deserialize)]
pub struct IngestResponse {
    /// Ids assigned to the records, in request order.
    pub ids: Vec<RecordId>,
    pub count: usize,
}

/// Response body for GET /health.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `ok`, `degraded` or `unhealthy`.
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Binary version.
    pub version: &'static str,
    pub uptime_secs: u64,
    pub records: usize,
    pub cells: usize,
    pub stale_cells: usize,
    pub marks: usize,
    pub fully_hydrated: bool,
}

pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|e| ApiError(CostError::Validation(e.body_text())))
}

/// Splits view query parameters into the period and equality filters.
///
/// Every parameter other than `period` is a dimension; comma-separated
/// values are alternatives.
fn view_params(mut params: HashMap<String, String>) -> (Period, DimensionFilter) {
    let period = params
        .remove("period")
        .map(|p| Period::parse_or_default(&p))
        .unwrap_or_default();
    let filter = params.into_iter().fold(DimensionFilter::all(), |acc, (name, values)| {
        acc.with(name, values.split(',').map(str::trim).map(str::to_string))
    });
    (period, filter)
}

/// POST /v1/records
///
/// Appends a JSON array of records and returns their ids. Every record must
/// fall inside the caller's scope.
pub async fn post_records(
    State(state): State<GatewayState>,
    Extension(principal): Extension<Principal>,
    payload: Result<Json<Vec<UsageRecord>>, JsonRejection>,
) -> Result<Json<IngestResponse>, ApiError> {
    let records = json_body(payload)?;
    if let Some(i) = records.iter().position(|r| !principal.permits(r)) {
        return Err(ApiError(CostError::NotAuthorized(format!(
            "principal {} may not write record {i} outside its scope",
            principal.name
        ))));
    }
    let ids = state.store.append_batch(records).await?;
    tracing::debug!(principal = %principal.name, count = ids.len(), "records ingested");
    Ok(Json(IngestResponse {
        count: ids.len(),
        ids,
    }))
}

/// POST /v1/query
pub async fn post_query(
    State(state): State<GatewayState>,
    Extension(principal): Extension<Principal>,
    payload: Result<Json<QuerySpec>, JsonRejection>,
) -> Result<Json<CostBreakdown>, ApiError> {
    let mut spec = json_body(payload)?;
    spec.filter = principal.scoped(&spec.filter);
    Ok(Json(state.planner.execute(&spec).await?))
}

/// GET /v1/costs/daily?period=30d
pub async fn get_daily(
    State(state): State<GatewayState>,
    Extension(principal): Extension<Principal>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<CostBreakdown>, ApiError> {
    let (period, filter) = view_params(params);
    let breakdown = state
        .planner
        .daily_totals(period, principal.scoped(&filter), state.today())
        .await?;
    Ok(Json(breakdown))
}

/// GET /v1/costs/monthly?period=12m
pub async fn get_monthly(
    State(state): State<GatewayState>,
    Extension(principal): Extension<Principal>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<CostBreakdown>, ApiError> {
    let (period, filter) = view_params(params);
    let breakdown = state
        .planner
        .monthly_totals(period, principal.scoped(&filter), state.today())
        .await?;
    Ok(Json(breakdown))
}

/// GET /v1/costs/by/{dimension}?period=30d
///
/// One entry per value of `dimension`, most expensive first.
pub async fn get_cost_by(
    State(state): State<GatewayState>,
    Extension(principal): Extension<Principal>,
    Path(dimension): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<CostBreakdown>, ApiError> {
    let (period, filter) = view_params(params);
    let breakdown = state
        .planner
        .cost_by(&dimension, period, principal.scoped(&filter), state.today())
        .await?;
    Ok(Json(breakdown))
}

/// GET /health
///
/// Unauthenticated. Reports backend health and engine counters; 503 when the
/// backend is unhealthy.
pub async fn get_public_health(State(state): State<GatewayState>) -> Response {
    let backend = state
        .store
        .backend()
        .health_check()
        .await
        .unwrap_or_else(|e| HealthStatus::Unhealthy(e.to_string()));
    let (code, status, detail) = match backend {
        HealthStatus::Healthy => (StatusCode::OK, "ok", None),
        HealthStatus::Degraded(msg) => (StatusCode::OK, "degraded", Some(msg)),
        HealthStatus::Unhealthy(msg) => (StatusCode::SERVICE_UNAVAILABLE, "unhealthy", Some(msg)),
    };
    let stats = state.planner.engine().stats();
    let body = HealthResponse {
        status,
        detail,
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.health.start_time.elapsed().as_secs(),
        records: state.store.len(),
        cells: stats.cells,
        stale_cells: stats.stale_cells,
        marks: stats.marks,
        fully_hydrated: stats.fully_hydrated,
    };
    (code, Json(body)).into_response()
}

/// GET /metrics
///
/// Prometheus text exposition; 404 when no exporter is installed.
pub async fn get_public_metrics(State(state): State<GatewayState>) -> Response {
    match &state.health.prometheus_render {
        Some(render) => {
            state.planner.engine().publish_gauges();
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
                render(),
            )
                .into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
