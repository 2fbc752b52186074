// SPDX-FileCopyrightText: 2026 Cost Explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Lookup order: `/etc/cost-explorer/cost-explorer.toml`, then the XDG user
//! config, then `./cost-explorer.toml`, then an explicit `--config` file,
//! with `COST_*` environment variable overrides on top.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::CostExplorerConfig;

/// System-wide configuration file.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/cost-explorer/cost-explorer.toml";

/// Configuration file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "cost-explorer.toml";

/// Sections an env var may address. `admin_retry` precedes `admin` so the
/// nested table wins the prefix match.
const ENV_SECTIONS: &[(&str, &str)] = &[
    ("admin_retry_", "admin.retry."),
    ("server_", "server."),
    ("storage_", "storage."),
    ("ingest_", "ingest."),
    ("aggregation_", "aggregation."),
    ("query_", "query."),
    ("retention_", "retention."),
    ("admin_", "admin."),
    ("metrics_", "metrics."),
];

/// User config file under the XDG config directory, if one can be resolved.
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("cost-explorer").join(LOCAL_CONFIG_FILE))
}

/// Load configuration from the standard hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/cost-explorer/cost-explorer.toml`
/// 3. `~/.config/cost-explorer/cost-explorer.toml`
/// 4. `./cost-explorer.toml`
/// 5. `explicit`, when given
/// 6. `COST_*` environment variables
pub fn load_config(explicit: Option<&Path>) -> Result<CostExplorerConfig, figment::Error> {
    build_figment(explicit).extract()
}

/// Load configuration from a TOML string only (no file lookup, no env).
///
/// Used for testing and for `check-config` on piped input.
pub fn load_config_from_str(toml_content: &str) -> Result<CostExplorerConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(CostExplorerConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a single file with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<CostExplorerConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(CostExplorerConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Build the Figment used for config loading without extracting it.
pub fn build_figment(explicit: Option<&Path>) -> Figment {
    let mut figment = Figment::new()
        .merge(Serialized::defaults(CostExplorerConfig::default()))
        .merge(Toml::file(SYSTEM_CONFIG_PATH))
        .merge(Toml::file(user_config_path().unwrap_or_default()))
        .merge(Toml::file(LOCAL_CONFIG_FILE));
    if let Some(path) = explicit {
        figment = figment.merge(Toml::file(path));
    }
    figment.merge(env_provider())
}

/// Maps a lowercased, prefix-stripped env var name onto a dotted config path.
///
/// Splitting on `_` would be ambiguous with underscore-containing keys:
/// `COST_QUERY_MAX_CELLS` must become `query.max_cells`, not `query.max.cells`.
pub fn map_env_key(key: &str) -> String {
    ENV_SECTIONS
        .iter()
        .find_map(|(prefix, section)| {
            key.strip_prefix(prefix)
                .map(|rest| format!("{section}{rest}"))
        })
        .unwrap_or_else(|| key.to_string())
}

fn env_provider() -> Env {
    Env::prefixed("COST_").map(|key| map_env_key(key.as_str()).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_keys_map_to_sections() {
        assert_eq!(map_env_key("server_port"), "server.port");
        assert_eq!(map_env_key("query_max_cells"), "query.max_cells");
        assert_eq!(
            map_env_key("aggregation_base_granularity"),
            "aggregation.base_granularity"
        );
        assert_eq!(
            map_env_key("admin_recompute_stale_on_read"),
            "admin.recompute_stale_on_read"
        );
    }

    #[test]
    fn nested_retry_section_wins_over_admin() {
        assert_eq!(map_env_key("admin_retry_max_attempts"), "admin.retry.max_attempts");
    }

    #[test]
    fn unknown_section_passes_through() {
        assert_eq!(map_env_key("bogus_key"), "bogus_key");
    }
}
