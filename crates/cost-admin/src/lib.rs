// SPDX-FileCopyrightText: 2026 Cost Explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Administrative surface of the cost explorer.
//!
//! Only linked into the `admin` build of the server. Provides forced
//! invalidation and recomputation, reimport from named sources, background
//! recomputes with exponential backoff, and the operation registry behind
//! `GET /admin/operations`.

pub mod controller;
pub mod locks;
pub mod operations;
pub mod retry;
pub mod source;

pub use controller::{AdminController, ReimportReport};
pub use locks::{RangeLockGuard, RangeLockTable};
pub use operations::{AdminOperation, OperationKind, OperationRegistry, OperationState};
pub use retry::{RetryPolicy, with_retry};
pub use source::{JsonLinesSource, ReimportWindow};
