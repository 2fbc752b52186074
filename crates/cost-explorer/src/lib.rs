// SPDX-FileCopyrightText: 2026 Cost Explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Process wiring for the `server` binary.
//!
//! [`app::App`] assembles the record store, aggregation engine, planner and
//! (in the admin build) the admin controller from a validated configuration.
//! [`serve::run_serve`] adds tracing, metrics, signal handling and the HTTP
//! listener on top.

pub mod app;
pub mod background;
pub mod demo;
pub mod serve;
pub mod shutdown;

pub use app::App;
