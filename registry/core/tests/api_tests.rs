// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! HTTP API tests driven through the axum router with `oneshot`.

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use dtp_core::application::admin::AdminService;
use dtp_core::application::card_reconciler::CardReconciler;
use dtp_core::application::event_tail::EventTail;
use dtp_core::application::last_data::LastDataCache;
use dtp_core::application::rbac_resolver::RbacResolver;
use dtp_core::application::registry::Registry;
use dtp_core::domain::portal::User;
use dtp_core::domain::registry_config::{EventTailConfig, LastDataConfig};
use dtp_core::domain::repository::CatalogStore;
use dtp_core::infrastructure::event_bus::EventBus;
use dtp_core::infrastructure::repositories::InMemoryCatalogStore;
use dtp_core::infrastructure::timeseries::TimeSeriesBackends;
use dtp_core::presentation::api::{app, AppState, USER_HEADER};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

const STAFF: &str = "admin@example.com";
const VIEWER: &str = "demo@example.com";

async fn router() -> Router {
    let store: Arc<dyn CatalogStore> = Arc::new(InMemoryCatalogStore::new());
    let mut tx = store.begin().await.unwrap();
    tx.insert_user(&User::new(STAFF, None, true)).await.unwrap();
    tx.insert_user(&User::new(VIEWER, None, false)).await.unwrap();
    tx.commit().await.unwrap();

    let registry = Arc::new(Registry::new(
        store.clone(),
        CardReconciler::default(),
        EventBus::with_default_capacity(),
        "demo",
    ));
    let last_data = Arc::new(LastDataCache::new(
        store.clone(),
        Arc::new(TimeSeriesBackends::default()),
        LastDataConfig::default(),
    ));

    app(AppState {
        registry,
        rbac: RbacResolver::new(store.clone()),
        last_data,
        event_tail: EventTail::new(store.clone(), EventTailConfig::default(), "demo"),
        admin: AdminService::new(store),
    })
}

async fn call(app: &Router, method: Method, uri: &str, user: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header(USER_HEADER, user);
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn lift() -> Value {
    json!({
        "@id": "dt:Lift_001",
        "metadata": {"status": "instantiated", "domain": "Lift"},
        "interfaces": {"api": "http://localhost:3001"},
    })
}

#[tokio::test]
async fn test_healthz_reports_refresher() {
    let app = router().await;
    let (status, body) = call(&app, Method::GET, "/api/healthz", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["last_data"]["running"], false);
    assert_eq!(body["last_data"]["interval_seconds"], 30);
}

#[tokio::test]
async fn test_identity_is_required() {
    let app = router().await;
    let (status, body) = call(&app, Method::GET, "/api/registry/twins", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "unauthorized");

    let (status, _) = call(&app, Method::GET, "/api/registry/twins", Some("ghost"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_upsert_requires_staff_and_reports_creation() {
    let app = router().await;

    let (status, body) = call(&app, Method::POST, "/api/registry/twins", Some(VIEWER), Some(lift())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "forbidden");

    let (status, body) = call(&app, Method::POST, "/api/registry/twins", Some(STAFF), Some(lift())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["twin"]["twin_id"], "dt:Lift_001");
    assert_eq!(body["twin"]["tenant"], "demo");

    let (status, body) = call(&app, Method::POST, "/api/registry/twins", Some(STAFF), Some(lift())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["created"], false);

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/registry/twins",
        Some(STAFF),
        Some(json!({"metadata": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation_error");
}

#[tokio::test]
async fn test_visibility_on_read_paths() {
    let app = router().await;
    call(&app, Method::POST, "/api/registry/twins", Some(STAFF), Some(lift())).await;

    let (status, body) = call(&app, Method::GET, "/api/registry/twins", Some(VIEWER), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));

    let (status, _) = call(&app, Method::GET, "/api/registry/twins/dt:Lift_001", Some(VIEWER), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = call(&app, Method::GET, "/api/registry/public/twins?domain=Lift", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (_, body) = call(&app, Method::GET, "/api/registry/twins?scope=all", Some(STAFF), None).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
    let (_, body) = call(&app, Method::GET, "/api/registry/my/twins", Some(STAFF), None).await;
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn test_patch_and_soft_delete() {
    let app = router().await;
    call(&app, Method::POST, "/api/registry/twins", Some(STAFF), Some(lift())).await;

    let (status, body) = call(
        &app,
        Method::PATCH,
        "/api/registry/twins/dt:Lift_001",
        Some(STAFF),
        Some(json!({"interfaces": null})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["interfaces"]["api"].is_null());

    let (status, body) = call(
        &app,
        Method::DELETE,
        "/api/registry/twins/dt:Lift_001?soft=true",
        Some(STAFF),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["detached"], "soft");
    assert_eq!(body["twin"]["metadata"]["status"], "deprecated");

    let (status, body) = call(&app, Method::DELETE, "/api/registry/twins/dt:Lift_001", Some(STAFF), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["detached"], "hard");

    let (status, _) = call(&app, Method::DELETE, "/api/registry/twins/dt:Lift_001", Some(STAFF), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_service_registration() {
    let app = router().await;
    let (status, body) = call(
        &app,
        Method::POST,
        "/api/registry/services",
        Some(STAFF),
        Some(json!({"category": "ui", "interfaces": {"api": "http://localhost:7474"}})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["category"], "UI");

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/registry/services",
        Some(STAFF),
        Some(json!({"interfaces": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation_error");

    let (_, body) = call(&app, Method::GET, "/api/registry/services/list", Some(VIEWER), None).await;
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn test_admin_grant_opens_visibility() {
    let app = router().await;
    call(&app, Method::POST, "/api/registry/twins", Some(STAFF), Some(lift())).await;

    let (_, users) = call(&app, Method::GET, "/api/admin/users", Some(STAFF), None).await;
    let viewer_id = users
        .as_array()
        .unwrap()
        .iter()
        .find(|u| u["username"] == VIEWER)
        .unwrap()["user_id"]
        .clone();
    let (_, cards) = call(&app, Method::GET, "/api/admin/cards", Some(STAFF), None).await;
    let card_id = cards[0]["card_id"].clone();

    let grant = json!({"user_id": viewer_id, "card_id": card_id});
    let (status, _) = call(&app, Method::POST, "/api/admin/grants", Some(STAFF), Some(grant.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = call(&app, Method::POST, "/api/admin/grants", Some(STAFF), Some(grant)).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = call(&app, Method::GET, "/api/registry/my/twins", Some(VIEWER), None).await;
    assert_eq!(body[0]["twin_id"], "dt:Lift_001");

    let (status, body) = call(&app, Method::GET, "/api/last-data/cached", Some(VIEWER), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"][0]["twin_id"], "dt:Lift_001");
    assert!(body["items"][0]["last_seen"].is_null());

    let uri = format!(
        "/api/admin/grants?user_id={}&card_id={}",
        viewer_id.as_str().unwrap(),
        card_id.as_str().unwrap()
    );
    let (status, _) = call(&app, Method::DELETE, &uri, Some(STAFF), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, body) = call(&app, Method::DELETE, &uri, Some(STAFF), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_admin_user_management() {
    let app = router().await;

    let (status, admin_body) = call(&app, Method::GET, "/api/admin/users", Some(VIEWER), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (_, registry_body) = call(&app, Method::POST, "/api/registry/twins", Some(VIEWER), Some(lift())).await;
    let expected = format!("Forbidden: user '{}' is not staff", VIEWER);
    assert_eq!(admin_body["error"]["message"], expected.as_str());
    assert_eq!(registry_body["error"]["message"], expected.as_str());

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/admin/users",
        Some(STAFF),
        Some(json!({"username": "ops@example.com"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["email"], "ops@example.com");
    assert_eq!(body["is_staff"], false);

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/admin/users",
        Some(STAFF),
        Some(json!({"username": VIEWER})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "conflict");
}
