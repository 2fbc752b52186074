// SPDX-FileCopyrightText: 2026 Cost Explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Checks semantic constraints serde attributes cannot express, such as a
//! parseable bind host, a fixed-width base bucket, and unique principal tokens.

use std::collections::HashSet;

use crate::diagnostic::ConfigError;
use crate::model::{BackendKind, CostExplorerConfig};

/// Longest ingestion or retention window accepted, in days.
pub const MAX_WINDOW_DAYS: u32 = 36_500;

/// Largest per-record cost ceiling accepted.
pub const MAX_RECORD_COST_CEILING: f64 = 1e15;

fn invalid(errors: &mut Vec<ConfigError>, message: String) {
    errors.push(ConfigError::Validation { message });
}

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns `Ok(())` if all validations pass, or every collected error
/// (does not fail fast).
pub fn validate_config(config: &CostExplorerConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    validate_server(config, &mut errors);

    if config.storage.backend == BackendKind::Sqlite
        && config.storage.database_path.trim().is_empty()
    {
        invalid(
            &mut errors,
            "storage.database_path must not be empty when storage.backend = \"sqlite\"".into(),
        );
    }

    let currency = &config.ingest.currency;
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_uppercase()) {
        invalid(
            &mut errors,
            format!("ingest.currency `{currency}` is not a three-letter ISO 4217 code"),
        );
    }

    if config.ingest.max_age_days > MAX_WINDOW_DAYS {
        invalid(
            &mut errors,
            format!(
                "ingest.max_age_days ({}) must not exceed {MAX_WINDOW_DAYS}",
                config.ingest.max_age_days
            ),
        );
    }
    if config.ingest.max_future_skew_secs > u64::from(MAX_WINDOW_DAYS) * 86_400 {
        invalid(
            &mut errors,
            format!(
                "ingest.max_future_skew_secs ({}) must not exceed {MAX_WINDOW_DAYS} days",
                config.ingest.max_future_skew_secs
            ),
        );
    }
    let ceiling = config.ingest.max_record_cost;
    if !ceiling.is_finite() || ceiling <= 0.0 || ceiling > MAX_RECORD_COST_CEILING {
        invalid(
            &mut errors,
            format!(
                "ingest.max_record_cost ({ceiling}) must be positive and at most {MAX_RECORD_COST_CEILING:e}"
            ),
        );
    }

    if !config.aggregation.base_granularity.is_fixed() {
        invalid(
            &mut errors,
            format!(
                "aggregation.base_granularity must be `hour` or `day`, got `{}`",
                config.aggregation.base_granularity
            ),
        );
    }
    if config.aggregation.dedup_window == 0 {
        invalid(&mut errors, "aggregation.dedup_window must be at least 1".into());
    }
    if config.aggregation.scan_page_size == 0 {
        invalid(&mut errors, "aggregation.scan_page_size must be at least 1".into());
    }

    if config.query.max_cells == 0 {
        invalid(&mut errors, "query.max_cells must be at least 1".into());
    }

    if let Some(days) = config.retention.max_age_days
        && days < config.ingest.max_age_days
    {
        invalid(
            &mut errors,
            format!(
                "retention.max_age_days ({days}) must not be shorter than ingest.max_age_days ({})",
                config.ingest.max_age_days
            ),
        );
    }
    if let Some(days) = config.retention.max_age_days
        && days > MAX_WINDOW_DAYS
    {
        invalid(
            &mut errors,
            format!("retention.max_age_days ({days}) must not exceed {MAX_WINDOW_DAYS}"),
        );
    }
    if config.retention.sweep_interval_secs == 0 {
        invalid(&mut errors, "retention.sweep_interval_secs must be at least 1".into());
    }

    validate_admin(config, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_server(config: &CostExplorerConfig, errors: &mut Vec<ConfigError>) {
    let host = config.server.host.trim();
    if host.is_empty() {
        invalid(errors, "server.host must not be empty".into());
    } else {
        let is_valid_ip = host.parse::<std::net::IpAddr>().is_ok();
        let is_valid_hostname = host
            .chars()
            .all(|c| c.is_alphanumeric() || c == '.' || c == '-');
        if !is_valid_ip && !is_valid_hostname {
            invalid(
                errors,
                format!("server.host `{host}` is not a valid IP address or hostname"),
            );
        }
    }

    if config.server.port == 0 {
        invalid(errors, "server.port must not be 0".into());
    }

    let base_path = &config.server.base_path;
    if !base_path.is_empty() && (!base_path.starts_with('/') || base_path.ends_with('/')) {
        invalid(
            errors,
            format!("server.base_path `{base_path}` must start with `/` and not end with `/`"),
        );
    }

    let mut names = HashSet::new();
    let mut tokens = HashSet::new();
    for (i, principal) in config.server.principals.iter().enumerate() {
        if principal.name.trim().is_empty() {
            invalid(errors, format!("server.principals[{i}].name must not be empty"));
        } else if !names.insert(principal.name.as_str()) {
            invalid(
                errors,
                format!("duplicate principal name `{}` in [[server.principals]]", principal.name),
            );
        }
        if principal.token.trim().is_empty() {
            invalid(errors, format!("server.principals[{i}].token must not be empty"));
        } else if !tokens.insert(principal.token.as_str()) {
            // Never echo the token itself.
            invalid(
                errors,
                format!("server.principals[{i}].token is shared with another principal"),
            );
        }
        for (dimension, values) in &principal.scope {
            if dimension.is_empty() || values.is_empty() || values.iter().any(String::is_empty) {
                invalid(
                    errors,
                    format!(
                        "server.principals[{i}].scope.{dimension} must name a dimension and at least one non-empty value"
                    ),
                );
            }
        }
    }
}

fn validate_admin(config: &CostExplorerConfig, errors: &mut Vec<ConfigError>) {
    let retry = &config.admin.retry;
    if retry.max_attempts == 0 {
        invalid(errors, "admin.retry.max_attempts must be at least 1".into());
    }
    if retry.backoff_multiplier < 1.0 || !retry.backoff_multiplier.is_finite() {
        invalid(
            errors,
            format!(
                "admin.retry.backoff_multiplier must be at least 1.0, got {}",
                retry.backoff_multiplier
            ),
        );
    }
    if !(0.0..=1.0).contains(&retry.jitter) {
        invalid(
            errors,
            format!("admin.retry.jitter must be within [0, 1], got {}", retry.jitter),
        );
    }
    if retry.initial_delay_ms > retry.max_delay_ms {
        invalid(
            errors,
            format!(
                "admin.retry.initial_delay_ms ({}) exceeds admin.retry.max_delay_ms ({})",
                retry.initial_delay_ms, retry.max_delay_ms
            ),
        );
    }

    let mut seen = HashSet::new();
    for (i, source) in config.admin.sources.iter().enumerate() {
        if source.name.trim().is_empty() {
            invalid(errors, format!("admin.sources[{i}].name must not be empty"));
        } else if !seen.insert(source.name.as_str()) {
            invalid(
                errors,
                format!("duplicate reimport source `{}` in [[admin.sources]]", source.name),
            );
        }
        if source.path.trim().is_empty() {
            invalid(errors, format!("admin.sources[{i}].path must not be empty"));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use cost_core::Granularity;

    use super::*;
    use crate::model::{PrincipalConfig, SourceConfig};

    fn messages(result: Result<(), Vec<ConfigError>>) -> Vec<String> {
        result
            .err()
            .unwrap_or_default()
            .into_iter()
            .map(|e| e.to_string())
            .collect()
    }

    fn principal(name: &str, token: &str) -> PrincipalConfig {
        PrincipalConfig {
            name: name.into(),
            token: token.into(),
            scope: BTreeMap::new(),
            admin: false,
        }
    }

    #[test]
    fn default_config_passes_validation() {
        assert!(validate_config(&CostExplorerConfig::default()).is_ok());
    }

    #[test]
    fn invalid_host_fails() {
        let mut config = CostExplorerConfig::default();
        config.server.host = "not a host!".into();
        let msgs = messages(validate_config(&config));
        assert!(msgs.iter().any(|m| m.contains("server.host")));
    }

    #[test]
    fn month_base_granularity_fails() {
        let mut config = CostExplorerConfig::default();
        config.aggregation.base_granularity = Granularity::Month;
        let msgs = messages(validate_config(&config));
        assert!(msgs.iter().any(|m| m.contains("base_granularity")));
    }

    #[test]
    fn lowercase_currency_fails() {
        let mut config = CostExplorerConfig::default();
        config.ingest.currency = "usd".into();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn retention_shorter_than_ingest_window_fails() {
        let mut config = CostExplorerConfig::default();
        config.retention.max_age_days = Some(30);
        let msgs = messages(validate_config(&config));
        assert!(msgs.iter().any(|m| m.contains("retention.max_age_days")));
    }

    #[test]
    fn windows_beyond_a_century_fail() {
        let mut config = CostExplorerConfig::default();
        config.ingest.max_age_days = u32::MAX;
        config.retention.max_age_days = Some(u32::MAX);
        let msgs = messages(validate_config(&config));
        assert!(msgs.iter().any(|m| m.contains("ingest.max_age_days")));
        assert!(msgs.iter().any(|m| m.contains("retention.max_age_days")));
    }

    #[test]
    fn record_cost_ceiling_must_be_positive_and_bounded() {
        for bad in [0.0, -1.0, f64::INFINITY, f64::NAN, 1e20] {
            let mut config = CostExplorerConfig::default();
            config.ingest.max_record_cost = bad;
            let msgs = messages(validate_config(&config));
            assert!(
                msgs.iter().any(|m| m.contains("ingest.max_record_cost")),
                "{bad} accepted"
            );
        }
    }

    #[test]
    fn unbounded_retention_is_fine() {
        let mut config = CostExplorerConfig::default();
        config.retention.max_age_days = None;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn duplicate_principal_tokens_fail_without_leaking() {
        let mut config = CostExplorerConfig::default();
        config.server.principals = vec![principal("a", "tok-1"), principal("b", "tok-1")];
        let msgs = messages(validate_config(&config));
        assert_eq!(msgs.len(), 1);
        assert!(msgs[0].contains("shared"));
        assert!(!msgs[0].contains("tok-1"));
    }

    #[test]
    fn empty_scope_values_fail() {
        let mut config = CostExplorerConfig::default();
        let mut p = principal("alice", "tok");
        p.scope.insert("user".into(), vec![]);
        config.server.principals = vec![p];
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn duplicate_sources_fail() {
        let mut config = CostExplorerConfig::default();
        config.admin.sources = vec![
            SourceConfig {
                name: "billing".into(),
                path: "a.jsonl".into(),
            },
            SourceConfig {
                name: "billing".into(),
                path: "b.jsonl".into(),
            },
        ];
        let msgs = messages(validate_config(&config));
        assert!(msgs.iter().any(|m| m.contains("duplicate reimport source")));
    }

    #[test]
    fn all_errors_are_collected() {
        let mut config = CostExplorerConfig::default();
        config.server.port = 0;
        config.query.max_cells = 0;
        config.admin.retry.jitter = 2.0;
        assert_eq!(messages(validate_config(&config)).len(), 3);
    }
}
