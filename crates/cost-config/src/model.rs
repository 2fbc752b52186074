// SPDX-FileCopyrightText: 2026 Cost Explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the cost explorer server.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use std::collections::BTreeMap;
use std::fmt;

use cost_core::Granularity;
use serde::{Deserialize, Serialize};

/// Top-level cost explorer configuration.
///
/// Loaded from TOML files following the XDG hierarchy, with `COST_*`
/// environment variable overrides. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CostExplorerConfig {
    /// HTTP listener and principals.
    #[serde(default)]
    pub server: ServerConfig,

    /// Durable record backend.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Ingestion acceptance window and currency.
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Aggregate cell arena settings.
    #[serde(default)]
    pub aggregation: AggregationConfig,

    /// Query planner limits.
    #[serde(default)]
    pub query: QueryConfig,

    /// Raw record retention.
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Admin controller settings. Ignored by builds without the admin surface.
    #[serde(default)]
    pub admin: AdminConfig,

    /// Prometheus exporter settings.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Address to bind the listener to.
    #[serde(default = "default_host")]
    pub host: String,

    /// TCP port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Prefix under which every route is mounted, e.g. `/costs`.
    #[serde(default)]
    pub base_path: String,

    /// Logging level (trace, debug, info, warn, error). `RUST_LOG` wins if set.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Bearer-token principals. With none configured every authenticated
    /// route is rejected.
    #[serde(default)]
    pub principals: Vec<PrincipalConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_path: String::new(),
            log_level: default_log_level(),
            principals: Vec::new(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

/// A caller identified by a bearer token.
#[derive(Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PrincipalConfig {
    /// Name used in logs and as the default `user` scope.
    pub name: String,

    /// Bearer token presented in the `Authorization` header.
    pub token: String,

    /// Dimension restrictions AND-ed into every query and checked on ingest.
    /// Empty means unrestricted.
    #[serde(default)]
    pub scope: BTreeMap<String, Vec<String>>,

    /// Grants the admin routes in builds that have them.
    #[serde(default)]
    pub admin: bool,
}

impl fmt::Debug for PrincipalConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrincipalConfig")
            .field("name", &self.name)
            .field("token", &"[redacted]")
            .field("scope", &self.scope)
            .field("admin", &self.admin)
            .finish()
    }
}

/// Which durable backend holds the raw records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Records live only in memory and are lost on restart.
    Memory,
    /// Records persist in a SQLite database.
    #[default]
    Sqlite,
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: BackendKind,

    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable Write-Ahead Logging mode for SQLite.
    #[serde(default = "default_true")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            database_path: default_database_path(),
            wal_mode: true,
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|d| d.join("cost-explorer").join("records.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("records.db"))
        .display()
        .to_string()
}

fn default_true() -> bool {
    true
}

/// Ingestion acceptance rules.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct IngestConfig {
    /// The single ISO 4217 currency the store accepts.
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Records older than this many days are rejected.
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u32,

    /// Records further in the future than this are rejected.
    #[serde(default = "default_max_future_skew_secs")]
    pub max_future_skew_secs: u64,

    /// Records whose `quantity * unit_cost` exceeds this are rejected.
    #[serde(default = "default_max_record_cost")]
    pub max_record_cost: f64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            currency: default_currency(),
            max_age_days: default_max_age_days(),
            max_future_skew_secs: default_max_future_skew_secs(),
            max_record_cost: default_max_record_cost(),
        }
    }
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_max_age_days() -> u32 {
    450
}

fn default_max_future_skew_secs() -> u64 {
    300
}

fn default_max_record_cost() -> f64 {
    1e12
}

/// Aggregation engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AggregationConfig {
    /// Width of a cell's time bucket. Must be `hour` or `day`.
    #[serde(default = "default_base_granularity")]
    pub base_granularity: Granularity,

    /// Recent record ids remembered per cell for duplicate detection.
    #[serde(default = "default_dedup_window")]
    pub dedup_window: usize,

    /// Build every cell from the store before serving. When off, queries
    /// fall back to raw scans until ranges are recomputed.
    #[serde(default = "default_true")]
    pub hydrate_on_start: bool,

    /// Records fetched per scan page during recompute and fallback scans.
    #[serde(default = "default_scan_page_size")]
    pub scan_page_size: usize,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            base_granularity: default_base_granularity(),
            dedup_window: default_dedup_window(),
            hydrate_on_start: true,
            scan_page_size: default_scan_page_size(),
        }
    }
}

fn default_base_granularity() -> Granularity {
    Granularity::Hour
}

fn default_dedup_window() -> usize {
    1024
}

fn default_scan_page_size() -> usize {
    512
}

/// Query planner configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct QueryConfig {
    /// Upper bound on `(bucket, key)` lookups a single query may imply.
    #[serde(default = "default_max_cells")]
    pub max_cells: u64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_cells: default_max_cells(),
        }
    }
}

fn default_max_cells() -> u64 {
    500_000
}

/// Raw record retention configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RetentionConfig {
    /// Records and cells older than this are swept. `None` keeps everything.
    #[serde(default = "default_retention_days")]
    pub max_age_days: Option<u32>,

    /// Seconds between retention sweeps.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_age_days: default_retention_days(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_retention_days() -> Option<u32> {
    Some(760)
}

fn default_sweep_interval_secs() -> u64 {
    3600
}

/// Admin controller configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AdminConfig {
    /// Backoff for background recomputes and reimport fetches.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Named reimport sources.
    #[serde(default)]
    pub sources: Vec<SourceConfig>,

    /// Schedule a background recompute when a query reads a stale cell.
    #[serde(default = "default_true")]
    pub recompute_stale_on_read: bool,

    /// Finished operations kept for `GET /admin/operations`.
    #[serde(default = "default_operation_history")]
    pub operation_history: usize,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            sources: Vec::new(),
            recompute_stale_on_read: true,
            operation_history: default_operation_history(),
        }
    }
}

fn default_operation_history() -> usize {
    1000
}

/// Exponential backoff parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Attempts including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Fraction of the delay randomly added or subtracted.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: default_jitter(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.1
}

/// A JSON-lines file of usage records available for reimport.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    pub name: String,
    pub path: String,
}

/// Prometheus exporter configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Serve `GET /metrics`.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = CostExplorerConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.storage.backend, BackendKind::Sqlite);
        assert!(config.storage.database_path.ends_with("records.db"));
        assert_eq!(config.ingest.currency, "USD");
        assert_eq!(config.aggregation.base_granularity, Granularity::Hour);
        assert_eq!(config.query.max_cells, 500_000);
        assert_eq!(config.retention.max_age_days, Some(760));
        assert_eq!(config.admin.retry.max_attempts, 5);
    }

    #[test]
    fn principal_debug_redacts_token() {
        let principal = PrincipalConfig {
            name: "finance".into(),
            token: "super-secret".into(),
            scope: BTreeMap::new(),
            admin: true,
        };
        let debug = format!("{principal:?}");
        assert!(debug.contains("[redacted]"));
        assert!(!debug.contains("super-secret"));

        let server = ServerConfig {
            principals: vec![principal],
            ..ServerConfig::default()
        };
        assert!(!format!("{server:?}").contains("super-secret"));
    }

    #[test]
    fn backend_kind_is_lowercase_in_toml() {
        let storage: StorageConfig = toml::from_str("backend = \"memory\"").unwrap();
        assert_eq!(storage.backend, BackendKind::Memory);
    }
}
