// SPDX-FileCopyrightText: 2026 Cost Explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Admin routes; only built with `--features admin`.

#![cfg(feature = "admin")]

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use cost_admin::AdminController;
use cost_config::model::PrincipalConfig;
use cost_gateway::{AuthConfig, GatewayState, build_router};
use cost_test_utils::TestHarness;

fn principal(name: &str, admin: bool) -> PrincipalConfig {
    PrincipalConfig {
        name: name.into(),
        token: format!("{name}-token"),
        scope: BTreeMap::new(),
        admin,
    }
}

fn app(harness: &TestHarness) -> (Router, Arc<AdminController>) {
    let admin = Arc::new(AdminController::new(
        Arc::clone(&harness.store),
        Arc::clone(&harness.engine),
        &harness.config.admin,
    ));
    let state = GatewayState::new(
        Arc::clone(&harness.store),
        Arc::clone(&harness.planner),
        AuthConfig::from_principals(&[principal("ops", true), principal("viewer", false)]),
    )
    .with_admin(Arc::clone(&admin));
    (build_router(state, ""), admin)
}

async fn send(app: &Router, method: &str, uri: &str, token: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {token}"))
        .header("content-type", "application/json");
    let body = body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty);
    let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

fn day() -> Value {
    json!({"range": {"start": "2026-07-01T00:00:00Z", "end": "2026-07-02T00:00:00Z"}})
}

#[tokio::test]
async fn non_admin_principal_is_forbidden() {
    let harness = TestHarness::new().await.unwrap();
    let (app, _) = app(&harness);
    let (status, body) = send(&app, "POST", "/admin/invalidate", "viewer-token", Some(day())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "not_authorized");
    let (status, _) = send(&app, "GET", "/admin/operations", "viewer-token", None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn invalidate_recompute_and_list_operations() {
    let harness = TestHarness::new().await.unwrap();
    let (app, _) = app(&harness);

    let (status, mark) = send(&app, "POST", "/admin/invalidate", "ops-token", Some(day())).await;
    assert_eq!(status, StatusCode::OK);
    let (_, marks) = send(&app, "GET", "/admin/marks", "ops-token", None).await;
    assert_eq!(marks.as_array().unwrap().len(), 1);
    assert_eq!(marks[0]["id"], mark["id"]);

    let (status, report) = send(&app, "POST", "/admin/recompute", "ops-token", Some(day())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["marks_cleared"], 1);
    let (_, marks) = send(&app, "GET", "/admin/marks", "ops-token", None).await;
    assert!(marks.as_array().unwrap().is_empty());

    let (_, ops) = send(&app, "GET", "/admin/operations", "ops-token", None).await;
    let ops = ops.as_array().unwrap();
    assert_eq!(ops.len(), 2);
    assert!(ops.iter().all(|op| op["state"] == "completed"));

    let id = ops[0]["id"].as_str().unwrap();
    let (status, op) = send(&app, "GET", &format!("/admin/operations/{id}"), "ops-token", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(op["id"], id);
}

#[tokio::test]
async fn background_recompute_is_accepted() {
    let harness = TestHarness::new().await.unwrap();
    let (app, admin) = app(&harness);
    let mut body = day();
    body["background"] = json!(true);
    let (status, op) = send(&app, "POST", "/admin/recompute", "ops-token", Some(body)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(op["kind"], "scheduled_recompute");
    admin.drain().await;
    let id = op["id"].as_str().unwrap();
    let (_, op) = send(&app, "GET", &format!("/admin/operations/{id}"), "ops-token", None).await;
    assert_eq!(op["state"], "completed");
}

#[tokio::test]
async fn unknown_operation_and_source_are_not_found() {
    let harness = TestHarness::new().await.unwrap();
    let (app, _) = app(&harness);
    let (status, _) = send(
        &app,
        "GET",
        "/admin/operations/00000000-0000-4000-8000-000000000000",
        "ops-token",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(
        &app,
        "POST",
        "/admin/reimport",
        "ops-token",
        Some(json!({"source": "nope", "window": "incremental"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn overlapping_admin_work_conflicts() {
    let harness = TestHarness::new().await.unwrap();
    let (app, _) = app(&harness);
    harness.source.close_gate();

    let background = {
        let app = app.clone();
        tokio::spawn(async move { send(&app, "POST", "/admin/recompute", "ops-token", Some(day())).await })
    };
    harness.source.wait_blocked().await;

    let (status, body) = send(&app, "POST", "/admin/invalidate", "ops-token", Some(day())).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "conflict");

    harness.source.open_gate();
    let (status, _) = background.await.unwrap();
    assert_eq!(status, StatusCode::OK);
}
