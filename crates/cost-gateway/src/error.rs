// SPDX-FileCopyrightText: 2026 Cost Explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP mapping of [`CostError`].

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use cost_core::CostError;

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Machine-readable error code.
    pub code: &'static str,
    /// Error description.
    pub error: String,
}

/// A [`CostError`] returned from a handler.
#[derive(Debug)]
pub struct ApiError(pub CostError);

impl From<CostError> for ApiError {
    fn from(err: CostError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            CostError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            CostError::RangeTooLarge { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "range_too_large"),
            CostError::Overflow(_) => (StatusCode::UNPROCESSABLE_ENTITY, "overflow"),
            CostError::ConcurrencyConflict { .. } => (StatusCode::CONFLICT, "conflict"),
            CostError::NotAuthorized(_) => (StatusCode::FORBIDDEN, "not_authorized"),
            CostError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            CostError::Recompute { .. } => (StatusCode::SERVICE_UNAVAILABLE, "recompute_failed"),
            CostError::Storage { .. } => (StatusCode::SERVICE_UNAVAILABLE, "storage_unavailable"),
            CostError::Cancelled => (StatusCode::INTERNAL_SERVER_ERROR, "cancelled"),
            CostError::Config(_) | CostError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::warn!(code, error = %self.0, "request failed");
        } else {
            tracing::debug!(code, error = %self.0, "request rejected");
        }
        (
            status,
            Json(ErrorResponse {
                code,
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}
