mod common;

use axum::{body::Body, http::Request, http::StatusCode};
use common::TestApp;

#[tokio::test]
async fn path_version_is_echoed_in_headers() {
    let app = TestApp::spawn().await;

    let res = app.get("/api/v2/version", None).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.header("x-api-version"), Some("v2"));
    assert_eq!(res.header("x-api-default-version"), Some("v1"));
    assert_eq!(res.body["data"]["version"], "v2");
    assert_eq!(res.body["data"]["isLatest"], true);
    assert_eq!(res.body["data"]["isDefault"], false);
}

#[tokio::test]
async fn unversioned_path_uses_default() {
    let app = TestApp::spawn().await;

    let res = app.get("/api/version", None).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.header("x-api-version"), Some("v1"));
    assert_eq!(res.body["data"]["isDefault"], true);
}

#[tokio::test]
async fn header_then_query_select_version() {
    let app = TestApp::spawn().await;

    let req = Request::builder()
        .uri("/api/version")
        .header("accept-version", "v2")
        .body(Body::empty())
        .unwrap();
    let res = app.send(req).await;
    assert_eq!(res.header("x-api-version"), Some("v2"));

    let res = app.get("/api/version?version=v2", None).await;
    assert_eq!(res.header("x-api-version"), Some("v2"));

    // The path segment wins over headers
    let req = Request::builder()
        .uri("/api/v1/version")
        .header("x-api-version", "v2")
        .body(Body::empty())
        .unwrap();
    let res = app.send(req).await;
    assert_eq!(res.header("x-api-version"), Some("v1"));
}

#[tokio::test]
async fn unsupported_version_is_rejected() {
    let app = TestApp::spawn().await;

    let res = app.get("/api/v9/users", None).await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.body["success"], false);
    assert_eq!(res.body["error"], "Unsupported API version: v9");
    assert_eq!(res.body["details"]["requestedVersion"], "v9");
    assert_eq!(
        res.body["details"]["supportedVersions"],
        serde_json::json!(["v1", "v2"])
    );
    assert_eq!(res.body["path"], "/api/v9/users");
}

#[tokio::test]
async fn version_catalogue_endpoints() {
    let app = TestApp::spawn().await;

    let res = app.get("/api/v1/version/all", None).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["data"]["versions"].as_array().unwrap().len(), 2);
    assert_eq!(res.body["data"]["latestVersion"], "v2");

    let res = app.get("/api/v1/version/changelog", None).await;
    assert_eq!(res.body["data"][0]["version"], "v2");

    let res = app.get("/api/v2/version/health", None).await;
    assert_eq!(res.body["data"]["status"], "healthy");
    assert_eq!(res.body["data"]["version"], "v2");
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let app = TestApp::spawn().await;

    let res = app.get("/api/v1/nothing-here", None).await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
    assert_eq!(res.body["error"], "Route not found");
}

#[tokio::test]
async fn health_is_unversioned() {
    let app = TestApp::spawn().await;

    let res = app.get("/health", None).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["status"], "healthy");
    assert_eq!(res.body["cache"]["backend"], "memory");
    assert_eq!(res.body["cache"]["status"], "connected");
    assert!(res.header("x-api-version").is_none());
    assert!(res.header("x-request-id").is_some());
    assert_eq!(res.header("x-content-type-options"), Some("nosniff"));
}
