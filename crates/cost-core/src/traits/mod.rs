// SPDX-FileCopyrightText: 2026 Cost Explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Adapter and seam traits.
//!
//! Pluggable adapters extend the [`PluginAdapter`] base trait and use
//! `#[async_trait]` for dynamic dispatch compatibility.

pub mod adapter;
pub mod backend;
pub mod reimport;
pub mod source;

pub use adapter::PluginAdapter;
pub use backend::{RecordBackend, WriteBatch};
pub use reimport::ReimportSource;
pub use source::{AppendListener, RecordSource};
