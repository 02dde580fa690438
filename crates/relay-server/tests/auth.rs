//! Tests for the HTTP surface: liveness and the credential routes.

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use relay_server::{auth::TokenIssuer, build_router, AppState, Config};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const SECRET: &str = "test-secret";

fn app() -> Router {
    let mut config = Config::default();
    config.auth.jwt_secret = Some(SECRET.to_string());
    config.metrics.enabled = false;
    config.client_url = Some("http://localhost:3000".to_string());

    build_router(Arc::new(AppState::new(config).unwrap())).unwrap()
}

async fn post(app: &Router, uri: &str, body: Value) -> Response {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn set_cookie(response: &Response) -> String {
    response
        .headers()
        .get(header::SET_COOKIE)
        .expect("set-cookie header")
        .to_str()
        .unwrap()
        .to_string()
}

fn alice() -> Value {
    json!({ "phonenumber": "555-0100", "email": "alice@example.com", "password": "hunter2" })
}

#[tokio::test]
async fn test_root_and_health() {
    let app = app();

    let response = app
        .clone()
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"Server is running!");

    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["onlineUsers"], 0);
}

#[tokio::test]
async fn test_register_sets_session_cookie() {
    let app = app();

    let response = post(&app, "/api/auth/register", alice()).await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let cookie = set_cookie(&response);
    assert!(cookie.starts_with("token="));
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("Secure"));
    assert!(cookie.contains("SameSite=None"));
    assert!(cookie.contains("Max-Age=604800"));

    let body = json_body(response).await;
    assert_eq!(body["message"], "User Registered Successfully");
    assert_eq!(body["user"]["email"], "alice@example.com");
    assert_eq!(body["user"]["phonenumber"], "555-0100");
    assert!(body["user"].get("password").is_none());

    let token = body["token"].as_str().unwrap();
    assert!(cookie.starts_with(&format!("token={token}")));

    let claims = TokenIssuer::new(SECRET.as_bytes(), Duration::from_secs(604_800))
        .verify(token)
        .unwrap();
    assert_eq!(claims.id, body["user"]["id"].as_str().unwrap());
    assert!(!claims.is_admin);
    assert_eq!(claims.exp - claims.iat, 604_800);
}

#[tokio::test]
async fn test_duplicate_registration_fails() {
    let app = app();

    assert_eq!(
        post(&app, "/api/auth/register", alice()).await.status(),
        StatusCode::CREATED
    );

    let response = post(&app, "/api/auth/register", alice()).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.headers().get(header::SET_COOKIE).is_none());
    assert_eq!(json_body(response).await["message"], "Failed to create user!");
}

#[tokio::test]
async fn test_register_requires_all_fields() {
    let app = app();

    let response = post(
        &app,
        "/api/auth/register",
        json!({ "phonenumber": "555-0100", "password": "hunter2" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = post(&app, "/api/auth/login", json!({ "phonenumber": "555-0100" })).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_login() {
    let app = app();
    let registered = json_body(post(&app, "/api/auth/register", alice()).await).await;

    let response = post(
        &app,
        "/api/auth/login",
        json!({ "phonenumber": "555-0100", "password": "hunter2" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(set_cookie(&response).starts_with("token="));

    let body = json_body(response).await;
    assert_eq!(body["message"], "Login Successful");
    assert_eq!(body["user"]["id"], registered["user"]["id"]);
}

#[tokio::test]
async fn test_login_rejects_bad_credentials() {
    let app = app();
    post(&app, "/api/auth/register", alice()).await;

    let wrong_password = post(
        &app,
        "/api/auth/login",
        json!({ "phonenumber": "555-0100", "password": "wrong" }),
    )
    .await;
    let unknown_user = post(
        &app,
        "/api/auth/login",
        json!({ "phonenumber": "555-0199", "password": "hunter2" }),
    )
    .await;

    for response in [wrong_password, unknown_user] {
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().get(header::SET_COOKIE).is_none());
        assert_eq!(json_body(response).await["message"], "Invalid credentials");
    }
}

#[tokio::test]
async fn test_logout_clears_cookie() {
    let app = app();

    let request = Request::builder()
        .method("POST")
        .uri("/api/auth/logout")
        .header(header::COOKIE, "token=abc")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let cookie = set_cookie(&response);
    assert!(cookie.starts_with("token="));
    assert!(cookie.contains("Max-Age=0"));
    assert_eq!(json_body(response).await["message"], "Logout Successful");
}
