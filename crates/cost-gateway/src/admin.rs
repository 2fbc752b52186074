// SPDX-FileCopyrightText: 2026 Cost Explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Admin routes. Only compiled with the `admin` feature.
//!
//! Every route requires a principal with `admin = true`. Filters are still
//! narrowed by the principal's scope; reimport replaces whole ranges and so
//! needs an unrestricted principal.

use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use uuid::Uuid;

use cost_admin::{AdminController, AdminOperation, ReimportReport, ReimportWindow};
use cost_core::{CostError, DimensionFilter, TimeRange};
use cost_engine::InvalidationMark;

use crate::auth::Principal;
use crate::error::ApiError;
use crate::handlers::json_body;
use crate::server::GatewayState;

/// Request body for POST /admin/invalidate and POST /admin/recompute.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RangeRequest {
    pub range: TimeRange,
    #[serde(default)]
    pub filter: DimensionFilter,
    /// Recompute only: queue in the background instead of waiting.
    #[serde(default)]
    pub background: bool,
}

/// Request body for POST /admin/reimport.
#[derive(Debug, Deserialize)]
pub struct ReimportRequest {
    pub source: String,
    #[serde(flatten)]
    pub window: ReimportWindow,
}

pub(crate) fn routes() -> Router<GatewayState> {
    Router::new()
        .route("/admin/invalidate", post(post_invalidate))
        .route("/admin/recompute", post(post_recompute))
        .route("/admin/reimport", post(post_reimport))
        .route("/admin/operations", get(get_operations))
        .route("/admin/operations/{id}", get(get_operation))
        .route("/admin/marks", get(get_marks))
}

fn controller(
    state: &GatewayState,
    principal: &Principal,
) -> Result<Arc<AdminController>, ApiError> {
    if !principal.admin {
        return Err(ApiError(CostError::NotAuthorized(format!(
            "principal {} lacks the admin capability",
            principal.name
        ))));
    }
    state
        .admin
        .clone()
        .ok_or_else(|| ApiError(CostError::Internal("admin controller not installed".into())))
}

/// POST /admin/invalidate
pub async fn post_invalidate(
    State(state): State<GatewayState>,
    Extension(principal): Extension<Principal>,
    payload: Result<Json<RangeRequest>, JsonRejection>,
) -> Result<Json<InvalidationMark>, ApiError> {
    let admin = controller(&state, &principal)?;
    let req = json_body(payload)?;
    let mark = admin.force_invalidate(&req.range, &principal.scoped(&req.filter))?;
    tracing::info!(principal = %principal.name, mark = mark.id, "admin invalidation");
    Ok(Json(mark))
}

/// POST /admin/recompute
///
/// Returns the recompute report, or `202 Accepted` with the queued operation
/// when `background` is set.
pub async fn post_recompute(
    State(state): State<GatewayState>,
    Extension(principal): Extension<Principal>,
    payload: Result<Json<RangeRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let admin = controller(&state, &principal)?;
    let req = json_body(payload)?;
    let filter = principal.scoped(&req.filter);
    if req.background {
        let op = admin.schedule_recompute(&req.range, &filter);
        return Ok((StatusCode::ACCEPTED, Json(op)).into_response());
    }
    let report = admin.force_recompute(&req.range, &filter).await?;
    tracing::info!(principal = %principal.name, range = %report.range, "admin recompute");
    Ok(Json(report).into_response())
}

/// POST /admin/reimport
pub async fn post_reimport(
    State(state): State<GatewayState>,
    Extension(principal): Extension<Principal>,
    payload: Result<Json<ReimportRequest>, JsonRejection>,
) -> Result<Json<ReimportReport>, ApiError> {
    let admin = controller(&state, &principal)?;
    if !principal.scope.is_empty() {
        return Err(ApiError(CostError::NotAuthorized(format!(
            "principal {} is scoped and cannot replace whole ranges",
            principal.name
        ))));
    }
    let req = json_body(payload)?;
    let report = admin
        .trigger_reimport(&req.source, req.window, state.today())
        .await?;
    tracing::info!(principal = %principal.name, source = %req.source, "admin reimport");
    Ok(Json(report))
}

/// GET /admin/operations
pub async fn get_operations(
    State(state): State<GatewayState>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Vec<AdminOperation>>, ApiError> {
    let admin = controller(&state, &principal)?;
    Ok(Json(admin.operations()))
}

/// GET /admin/operations/{id}
pub async fn get_operation(
    State(state): State<GatewayState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> Result<Json<AdminOperation>, ApiError> {
    let admin = controller(&state, &principal)?;
    Ok(Json(admin.operation(id)?))
}

/// GET /admin/marks
pub async fn get_marks(
    State(state): State<GatewayState>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Vec<InvalidationMark>>, ApiError> {
    let admin = controller(&state, &principal)?;
    Ok(Json(admin.marks()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reimport_request_flattens_window() {
        let req: ReimportRequest =
            serde_json::from_str(r#"{"source":"billing","window":"incremental"}"#).unwrap();
        assert_eq!(req.source, "billing");
        assert_eq!(req.window, ReimportWindow::Incremental);

        let req: ReimportRequest = serde_json::from_str(
            r#"{"source":"billing","window":"range","range":{"start":"2026-01-01T00:00:00Z","end":"2026-01-02T00:00:00Z"}}"#,
        )
        .unwrap();
        assert!(matches!(req.window, ReimportWindow::Range { .. }));
    }

    #[test]
    fn range_request_defaults() {
        let req: RangeRequest = serde_json::from_str(
            r#"{"range":{"start":"2026-01-01T00:00:00Z","end":"2026-01-02T00:00:00Z"}}"#,
        )
        .unwrap();
        assert!(req.filter.is_empty());
        assert!(!req.background);
    }
}
