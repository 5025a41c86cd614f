mod common;

use axum::http::{Method, StatusCode};
use common::{TestApp, ADMIN_EMAIL, ADMIN_PASSWORD};
use serde_json::json;
use user_api::models::{AuditAction, AuditFilters};

#[tokio::test]
async fn login_returns_tokens_and_sanitized_user() {
    let app = TestApp::spawn().await;

    let res = app
        .post(
            "/api/v1/auth/login",
            None,
            json!({ "email": ADMIN_EMAIL, "password": ADMIN_PASSWORD }),
        )
        .await;

    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["success"], true);
    let data = &res.body["data"];
    assert_eq!(data["user"]["id"], 1);
    assert_eq!(data["user"]["type"], "admin");
    assert!(data["user"].get("passwordHash").is_none());
    assert_eq!(data["expiresIn"], 86400);
    assert!(data["accessToken"].is_string());
    assert!(data["refreshToken"].is_string());
}

#[tokio::test]
async fn wrong_password_is_unauthorized_and_audited_once() {
    let app = TestApp::spawn().await;

    let res = app
        .post(
            "/api/v1/auth/login",
            None,
            json!({ "email": ADMIN_EMAIL, "password": "not-it" }),
        )
        .await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(res.body["error"], "Invalid email or password");

    let res = app
        .post(
            "/api/v1/auth/login",
            None,
            json!({ "email": "nobody@example.com", "password": "whatever" }),
        )
        .await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(res.body["error"], "Invalid email or password");

    let failed = app
        .state
        .audit
        .query(&AuditFilters {
            action: Some(AuditAction::LoginFailed),
            ..Default::default()
        })
        .await;
    assert_eq!(failed.total, 2);
    assert!(failed.entries.iter().all(|e| !e.success));
}

#[tokio::test]
async fn malformed_login_is_a_validation_error() {
    let app = TestApp::spawn().await;

    let res = app
        .post(
            "/api/v1/auth/login",
            None,
            json!({ "email": "not-an-email", "password": "" }),
        )
        .await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.body["error"], "Validation failed");
    assert!(res.body["details"]["email"].is_array());
    assert!(res.body["details"]["password"].is_array());
}

#[tokio::test]
async fn missing_token_is_401_and_bad_token_is_403() {
    let app = TestApp::spawn().await;

    let res = app.get("/api/v1/users", None).await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);

    let req = axum::http::Request::builder()
        .uri("/api/v1/users")
        .header("authorization", "Basic YWRtaW46YWRtaW4=")
        .body(axum::body::Body::empty())
        .unwrap();
    assert_eq!(app.send(req).await.status, StatusCode::UNAUTHORIZED);

    let res = app.get("/api/v1/users", Some("not.a.jwt")).await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);

    let denied = app
        .state
        .audit
        .query(&AuditFilters {
            action: Some(AuditAction::UnauthorizedAccess),
            ..Default::default()
        })
        .await;
    assert_eq!(denied.total, 1);
}

#[tokio::test]
async fn refresh_token_cannot_be_used_as_access_token() {
    let app = TestApp::spawn().await;
    let (_, refresh) = app.login(ADMIN_EMAIL, ADMIN_PASSWORD).await;

    let res = app.get("/api/v1/users", Some(&refresh)).await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn refresh_token_is_single_use() {
    let app = TestApp::spawn().await;
    let (_, refresh) = app.login(ADMIN_EMAIL, ADMIN_PASSWORD).await;

    let res = app
        .post("/api/v1/auth/refresh", None, json!({ "refreshToken": refresh }))
        .await;
    assert_eq!(res.status, StatusCode::OK);
    let rotated = res.body["data"]["refreshToken"].as_str().unwrap().to_string();
    assert_ne!(rotated, refresh);

    let res = app
        .post("/api/v1/auth/refresh", None, json!({ "refreshToken": refresh }))
        .await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
    assert_eq!(res.body["error"], "Invalid refresh token");

    let res = app
        .post("/api/v1/auth/refresh", None, json!({ "refreshToken": rotated }))
        .await;
    assert_eq!(res.status, StatusCode::OK);
}

#[tokio::test]
async fn new_login_replaces_previous_refresh_token() {
    let app = TestApp::spawn().await;
    let (_, first) = app.login(ADMIN_EMAIL, ADMIN_PASSWORD).await;
    let (_, second) = app.login(ADMIN_EMAIL, ADMIN_PASSWORD).await;

    let res = app
        .post("/api/v1/auth/refresh", None, json!({ "refreshToken": first }))
        .await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);

    let res = app
        .post("/api/v1/auth/refresh", None, json!({ "refreshToken": second }))
        .await;
    assert_eq!(res.status, StatusCode::OK);
}

#[tokio::test]
async fn logout_revokes_refresh_token() {
    let app = TestApp::spawn().await;
    let (access, refresh) = app.login(ADMIN_EMAIL, ADMIN_PASSWORD).await;

    let res = app
        .request(Method::POST, "/api/v1/auth/logout", Some(&access), None)
        .await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["message"], "Logged out successfully");

    let res = app
        .post("/api/v1/auth/refresh", None, json!({ "refreshToken": refresh }))
        .await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn auth_stats_count_todays_activity() {
    let app = TestApp::spawn().await;
    let access = app.admin_token().await;
    app.post(
        "/api/v1/auth/login",
        None,
        json!({ "email": ADMIN_EMAIL, "password": "wrong-password" }),
    )
    .await;

    let res = app.get("/api/v1/auth/stats", Some(&access)).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["data"]["loginSuccess"], 1);
    assert_eq!(res.body["data"]["loginFailed"], 1);
    assert_eq!(res.body["data"]["activeSessions"], 1);

    let res = app
        .request(Method::POST, "/api/v1/auth/cleanup", Some(&access), None)
        .await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["data"]["sessionsChecked"], 1);
    assert_eq!(res.body["data"]["sessionsRemoved"], 0);
}

#[tokio::test]
async fn login_limiter_blocks_credential_stuffing() {
    let mut config = user_api::config::test_defaults();
    config.rate_limit.login_attempts = 2;
    let app = TestApp::with_config(config).await;

    for _ in 0..2 {
        let res = app
            .post(
                "/api/v1/auth/login",
                None,
                json!({ "email": ADMIN_EMAIL, "password": "guess" }),
            )
            .await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    }

    let res = app
        .post(
            "/api/v1/auth/login",
            None,
            json!({ "email": ADMIN_EMAIL, "password": ADMIN_PASSWORD }),
        )
        .await;
    assert_eq!(res.status, StatusCode::TOO_MANY_REQUESTS);
    assert!(res.header("retry-after").is_some());
}
