//! End-to-end API tests against in-memory registries and value store.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use orgsecrets_server::config::ServerConfig;
use orgsecrets_server::routes::build_router;
use orgsecrets_server::state::{AppState, Registries};
use orgsecrets_storage::MemoryStore;

const JWT_SECRET: &str = "integration-test-secret-0123456789abcdef";

fn app_with_limit(free_tier_limit: i64) -> Router {
    let config = ServerConfig::from_lookup(|name| match name {
        "ORGSECRETS_JWT_SECRET" => Some(JWT_SECRET.to_owned()),
        "ORGSECRETS_FREE_TIER_LIMIT" => Some(free_tier_limit.to_string()),
        _ => None,
    })
    .unwrap();
    let state = AppState::new(
        &config,
        Registries::in_memory(config.free_tier_limit),
        Arc::new(MemoryStore::new()),
    );
    build_router(Arc::new(state))
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

/// Register a user and return `(access_token, refresh_token, user_id)`.
async fn register(app: &Router, email: &str) -> (String, String, String) {
    let (status, body) = send(
        app,
        "POST",
        "/v1/auth/register",
        None,
        Some(json!({
            "email": email,
            "password": "correct horse battery staple",
            "first_name": "Ada",
            "last_name": "Lovelace"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    (
        body["access_token"].as_str().unwrap().to_owned(),
        body["refresh_token"].as_str().unwrap().to_owned(),
        body["user"]["id"].as_str().unwrap().to_owned(),
    )
}

async fn create_org(app: &Router, token: &str, name: &str) -> String {
    let (status, body) = send(
        app,
        "POST",
        "/v1/orgs",
        Some(token),
        Some(json!({ "name": name, "description": "test org" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["id"].as_str().unwrap().to_owned()
}

fn secrets_url(org: &str, project: Uuid) -> String {
    format!("/v1/orgs/{org}/projects/{project}/environments/production/secrets")
}

#[tokio::test]
async fn secret_lifecycle_end_to_end() {
    let app = app_with_limit(5);
    let (token, _, user_id) = register(&app, "owner@example.com").await;
    let org = create_org(&app, &token, "Acme").await;
    let project = Uuid::new_v4();
    let base = secrets_url(&org, project);

    let (status, created) = send(
        &app,
        "POST",
        &base,
        Some(&token),
        Some(json!({ "name": "DB_PASSWORD", "value": "s3cret", "description": "primary db" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{created}");
    assert_eq!(created["version"], 1);
    assert_eq!(created["created_by"], user_id.as_str());

    let (status, read) = send(&app, "GET", &format!("{base}/DB_PASSWORD"), Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(read["value"], "s3cret");
    assert_eq!(read["environment"], "production");

    let (status, updated) = send(
        &app,
        "PUT",
        &format!("{base}/DB_PASSWORD"),
        Some(&token),
        Some(json!({ "value": "rotated" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["version"], 2);
    assert_eq!(updated["description"], "primary db");

    let (status, listing) = send(&app, "GET", &base, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listing["skipped"], 0);
    let secrets = listing["secrets"].as_array().unwrap();
    assert_eq!(secrets.len(), 1);
    assert_eq!(secrets[0]["name"], "DB_PASSWORD");
    assert!(secrets[0].get("value").is_none());

    let (status, _) = send(&app, "DELETE", &format!("{base}/DB_PASSWORD"), Some(&token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(&app, "GET", &format!("{base}/DB_PASSWORD"), Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let (status, usage) = send(&app, "GET", &format!("/v1/orgs/{org}/usage"), Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(usage["secret_count"], 0);
    assert!(usage["api_calls"].as_i64().unwrap() >= 7);
}

#[tokio::test]
async fn duplicate_secret_conflicts() {
    let app = app_with_limit(5);
    let (token, _, _) = register(&app, "dup@example.com").await;
    let org = create_org(&app, &token, "Dup Co").await;
    let base = secrets_url(&org, Uuid::new_v4());
    let body = json!({ "name": "API_KEY", "value": "one" });

    let (status, _) = send(&app, "POST", &base, Some(&token), Some(body.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, err) = send(&app, "POST", &base, Some(&token), Some(body)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["error"], "conflict");
}

#[tokio::test]
async fn quota_is_enforced_and_freed_by_delete() {
    let app = app_with_limit(1);
    let (token, _, _) = register(&app, "quota@example.com").await;
    let org = create_org(&app, &token, "Small Co").await;
    let base = secrets_url(&org, Uuid::new_v4());

    let (status, _) = send(&app, "POST", &base, Some(&token), Some(json!({ "name": "A", "value": "1" }))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, err) = send(&app, "POST", &base, Some(&token), Some(json!({ "name": "B", "value": "2" }))).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(err["error"], "quota_exceeded");

    let (status, _) = send(&app, "DELETE", &format!("{base}/A"), Some(&token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&app, "POST", &base, Some(&token), Some(json!({ "name": "B", "value": "2" }))).await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn subscription_raises_the_limit() {
    let app = app_with_limit(0);
    let (token, _, _) = register(&app, "plan@example.com").await;
    let org = create_org(&app, &token, "Paying Co").await;
    let base = secrets_url(&org, Uuid::new_v4());

    let (status, _) = send(&app, "POST", &base, Some(&token), Some(json!({ "name": "A", "value": "1" }))).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    let end = chrono::Utc::now() + chrono::Duration::days(30);
    let (status, sub) = send(
        &app,
        "POST",
        &format!("/v1/orgs/{org}/subscriptions"),
        Some(&token),
        Some(json!({ "plan_id": "pro", "secrets_limit": 100, "end_date": end })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{sub}");
    assert_eq!(sub["status"], "active");

    let (status, _) = send(&app, "POST", &base, Some(&token), Some(json!({ "name": "A", "value": "1" }))).await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn requests_without_valid_token_are_rejected() {
    let app = app_with_limit(5);

    let (status, body) = send(&app, "GET", "/v1/auth/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let (status, body) = send(&app, "GET", "/v1/auth/me", Some("not-a-jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_token");

    let (_, refresh, _) = register(&app, "kind@example.com").await;
    let (status, _) = send(&app, "GET", "/v1/auth/me", Some(&refresh), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn outsiders_cannot_touch_an_organization() {
    let app = app_with_limit(5);
    let (owner, _, _) = register(&app, "alice@example.com").await;
    let (outsider, _, _) = register(&app, "mallory@example.com").await;
    let org = create_org(&app, &owner, "Private Co").await;
    let base = secrets_url(&org, Uuid::new_v4());

    let (status, _) = send(&app, "GET", &base, Some(&outsider), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&app, "POST", &format!("/v1/orgs/{org}/reconcile"), Some(&outsider), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, report) = send(
        &app,
        "POST",
        &format!("/v1/orgs/{org}/reconcile?repair=true"),
        Some(&owner),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["repair"], true);
}

#[tokio::test]
async fn refresh_token_is_single_use() {
    let app = app_with_limit(5);
    let (_, refresh, _) = register(&app, "rotate@example.com").await;

    let (status, pair) = send(
        &app,
        "POST",
        "/v1/auth/refresh",
        None,
        Some(json!({ "refresh_token": refresh })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let access = pair["access_token"].as_str().unwrap().to_owned();

    let (status, body) = send(
        &app,
        "POST",
        "/v1/auth/refresh",
        None,
        Some(json!({ "refresh_token": refresh })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_token");

    let (status, me) = send(&app, "GET", "/v1/auth/me", Some(&access), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["email"], "rotate@example.com");
    assert!(me.get("password_hash").is_none());
}

#[tokio::test]
async fn login_failures_do_not_reveal_accounts() {
    let app = app_with_limit(5);
    register(&app, "known@example.com").await;

    let (wrong_password, body_a) = send(
        &app,
        "POST",
        "/v1/auth/login",
        None,
        Some(json!({ "email": "known@example.com", "password": "nope" })),
    )
    .await;
    let (unknown_email, body_b) = send(
        &app,
        "POST",
        "/v1/auth/login",
        None,
        Some(json!({ "email": "ghost@example.com", "password": "nope" })),
    )
    .await;
    assert_eq!(wrong_password, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown_email, StatusCode::UNAUTHORIZED);
    assert_eq!(body_a, body_b);
}

#[tokio::test]
async fn health_reports_ok_with_security_headers() {
    let app = app_with_limit(5);
    let response = app
        .oneshot(Request::builder().uri("/v1/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
    assert_eq!(headers[header::X_FRAME_OPTIONS], "DENY");
    assert_eq!(headers[header::CACHE_CONTROL], "no-store");
}
