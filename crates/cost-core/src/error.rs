// SPDX-FileCopyrightText: 2026 Cost Explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the cost explorer.

use thiserror::Error;

use crate::time::TimeRange;

/// The primary error type used across the record store, aggregation engine,
/// query planner, and admin controller.
#[derive(Debug, Error)]
pub enum CostError {
    /// Malformed or out-of-range input record or query.
    #[error("validation error: {0}")]
    Validation(String),

    /// The query implies more cell lookups than the configured cap allows.
    #[error("query implies {cells} cell lookups, exceeding the cap of {cap}")]
    RangeTooLarge { cells: u64, cap: u64 },

    /// Recomputation of aggregate cells failed; the affected cells keep their prior state.
    #[error("recompute failed: {message}")]
    Recompute {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// An admin operation is already in flight on an overlapping range.
    #[error("conflicting admin operation in progress for {range}")]
    ConcurrencyConflict { range: TimeRange },

    /// The caller is authenticated but lacks the required capability.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// The operation observed its cancellation signal before completing.
    #[error("operation cancelled")]
    Cancelled,

    /// Storage backend errors (database connection, query failure, serialization).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// A cost sum left the representable decimal range.
    #[error("arithmetic overflow: {0}")]
    Overflow(String),

    /// A referenced entity (operation, reimport source) does not exist.
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CostError {
    /// Wraps any error as a storage failure.
    pub fn storage(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Storage {
            source: Box::new(err),
        }
    }

    /// Wraps a lower-level failure as a recompute failure.
    pub fn recompute(message: impl Into<String>, source: CostError) -> Self {
        Self::Recompute {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Whether a background retry loop should try the failed operation again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage { .. } | Self::Recompute { .. })
    }
}
