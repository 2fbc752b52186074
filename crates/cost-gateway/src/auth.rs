// SPDX-FileCopyrightText: 2026 Cost Explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bearer-token authentication and principal scoping.
//!
//! Each configured token maps to a [`Principal`]. The middleware attaches
//! the principal to the request so handlers can AND its scope into every
//! query and refuse ingest outside it.
//!
//! When no principals are configured, all requests are rejected (fail-closed).

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};

use cost_config::model::PrincipalConfig;
use cost_core::{DimensionFilter, UsageRecord};

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq)]
pub struct Principal {
    pub name: String,
    /// Restriction AND-ed into every query; empty means unrestricted.
    pub scope: DimensionFilter,
    pub admin: bool,
}

impl Principal {
    pub fn from_config(config: &PrincipalConfig) -> Self {
        let scope = config
            .scope
            .iter()
            .fold(DimensionFilter::all(), |acc, (name, values)| {
                acc.with(name.clone(), values.iter().cloned())
            });
        Self {
            name: config.name.clone(),
            scope,
            admin: config.admin,
        }
    }

    /// `filter` narrowed to what this principal may see.
    pub fn scoped(&self, filter: &DimensionFilter) -> DimensionFilter {
        filter.and(&self.scope)
    }

    /// Whether the principal may write `record`.
    pub fn permits(&self, record: &UsageRecord) -> bool {
        self.scope.matches_map(&record.dimensions)
    }
}

/// Token table for the gateway.
#[derive(Clone, Default)]
pub struct AuthConfig {
    principals: Arc<HashMap<String, Principal>>,
}

impl AuthConfig {
    pub fn from_principals(principals: &[PrincipalConfig]) -> Self {
        let principals = principals
            .iter()
            .map(|p| (p.token.clone(), Principal::from_config(p)))
            .collect();
        Self {
            principals: Arc::new(principals),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.principals.is_empty()
    }

    fn lookup(&self, token: &str) -> Option<&Principal> {
        self.principals.get(token)
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.principals.values().map(|p| p.name.as_str()).collect();
        names.sort_unstable();
        f.debug_struct("AuthConfig")
            .field("principals", &names)
            .field("tokens", &"[redacted]")
            .finish()
    }
}

/// Middleware that resolves the bearer token to a [`Principal`].
pub async fn auth_middleware(
    State(auth): State<AuthConfig>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if auth.is_empty() {
        tracing::error!("gateway has no principals configured -- rejecting request");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let token = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let Some(principal) = token.and_then(|t| auth.lookup(t)).cloned() else {
        tracing::debug!("request rejected: missing or unknown bearer token");
        return Err(StatusCode::UNAUTHORIZED);
    };
    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn principal(scope: &[(&str, &[&str])]) -> PrincipalConfig {
        PrincipalConfig {
            name: "alice".into(),
            token: "secret-token".into(),
            scope: scope
                .iter()
                .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
                .collect(),
            admin: false,
        }
    }

    #[test]
    fn auth_config_debug_redacts_token() {
        let config = AuthConfig::from_principals(&[principal(&[])]);
        let debug_output = format!("{config:?}");
        assert!(!debug_output.contains("secret-token"));
        assert!(debug_output.contains("[redacted]"));
        assert!(debug_output.contains("alice"));
    }

    #[test]
    fn scope_is_anded_into_filters() {
        let p = Principal::from_config(&principal(&[("user", &["alice"])]));
        let requested = DimensionFilter::all().with("model", ["opus"]);
        let scoped = p.scoped(&requested);
        assert_eq!(
            scoped,
            DimensionFilter::all().with("model", ["opus"]).with("user", ["alice"])
        );

        // Asking for someone else's data narrows to nothing.
        let other = p.scoped(&DimensionFilter::all().with("user", ["bob"]));
        assert!(other.is_disjoint(&DimensionFilter::all()));
    }

    #[test]
    fn unrestricted_principal_permits_everything() {
        let p = Principal::from_config(&principal(&[]));
        let record = UsageRecord {
            timestamp: chrono::Utc::now(),
            dimensions: BTreeMap::from([("user".to_string(), "bob".to_string())]),
            quantity: 1.0,
            unit_cost: 1.0,
            currency: "USD".into(),
        };
        assert!(p.permits(&record));
        let scoped = Principal::from_config(&principal(&[("user", &["alice"])]));
        assert!(!scoped.permits(&record));
    }
}
