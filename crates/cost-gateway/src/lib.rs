// SPDX-FileCopyrightText: 2026 Cost Explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP gateway for the cost explorer.
//!
//! Exposes ingestion, cost-breakdown queries, the dashboard convenience
//! views, health and Prometheus metrics. Builds with the `admin` feature
//! additionally mount the `/admin` routes backed by an
//! [`AdminController`](cost_admin::AdminController).

#[cfg(feature = "admin")]
pub mod admin;
pub mod auth;
pub mod error;
pub mod handlers;
pub mod server;

pub use auth::{AuthConfig, Principal, auth_middleware};
pub use error::{ApiError, ErrorResponse};
pub use server::{Clock, GatewayState, HealthState, bind, build_router, start_server};
