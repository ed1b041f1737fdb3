//! Shared helpers for driving the router in-process.
#![allow(dead_code)]

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, Response, StatusCode, header},
};
use cinevault::{
    ServerConfig, create_app, db::Database, jwt::TokenIssuer, rate_limit::RateLimitConfig,
};
use std::sync::Arc;
use serde_json::{Value, json};
use tower::ServiceExt;

pub const ACCESS_SECRET: &[u8] = b"test-access-secret-0123456789abcdef";
pub const REFRESH_SECRET: &[u8] = b"test-refresh-secret-0123456789abcdef";
pub const TEST_IP: &str = "127.0.0.1";
pub const PASSWORD: &str = "password123";

pub fn test_config(db: Database, auth_rate_per_minute: u32) -> ServerConfig {
    test_config_with_refresh_ttl(db, auth_rate_per_minute, 86400)
}

pub fn test_config_with_refresh_ttl(
    db: Database,
    auth_rate_per_minute: u32,
    refresh_ttl: u64,
) -> ServerConfig {
    ServerConfig {
        db,
        access_secret: ACCESS_SECRET.to_vec(),
        refresh_secret: REFRESH_SECRET.to_vec(),
        access_ttl: 300,
        refresh_ttl,
        bcrypt_cost: 4,
        rate_limit: Arc::new(RateLimitConfig::new(auth_rate_per_minute, true)),
    }
}

/// Create a test app and return (app, db, issuer).
pub async fn create_test_app() -> (Router, Database, TokenIssuer) {
    create_test_app_with_rate(10_000).await
}

pub async fn create_test_app_with_rate(per_minute: u32) -> (Router, Database, TokenIssuer) {
    let db = Database::open(":memory:")
        .await
        .expect("Failed to open test database");
    let app = create_app(&test_config(db.clone(), per_minute)).expect("Failed to build app");
    let issuer = TokenIssuer::new(ACCESS_SECRET, REFRESH_SECRET).expect("Invalid test secrets");
    (app, db, issuer)
}

/// Send one request through a clone of the router.
pub async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

/// Request builder for a JSON endpoint, coming from the test client IP.
pub fn json_request(method: &str, uri: &str) -> axum::http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-forwarded-for", TEST_IP)
}

pub fn json_body(builder: axum::http::request::Builder, body: Value) -> Request<Body> {
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn get(uri: &str) -> axum::http::request::Builder {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header("x-forwarded-for", TEST_IP)
}

pub fn bearer(access_token: &str) -> String {
    format!("Bearer {}", access_token)
}

pub fn jwt_cookie(refresh_token: &str) -> String {
    format!("jwt={}", refresh_token)
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Extract Set-Cookie headers from response
pub fn extract_set_cookies(response: &Response<Body>) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .collect()
}

/// Refresh token installed by the response, if any.
pub fn issued_refresh_token(response: &Response<Body>) -> Option<String> {
    extract_set_cookies(response)
        .iter()
        .filter(|c| !c.contains("Max-Age=0"))
        .find_map(|c| {
            c.strip_prefix("jwt=")
                .and_then(|rest| rest.split(';').next())
                .map(str::to_string)
        })
}

/// Check if cookies clear the refresh token (Max-Age=0)
pub fn has_cleared_cookie(response: &Response<Body>) -> bool {
    extract_set_cookies(response)
        .iter()
        .any(|c| c.starts_with("jwt=;") && c.contains("Max-Age=0"))
}

pub async fn register(app: &Router, name: &str, email: &str) -> StatusCode {
    let request = json_body(
        json_request("POST", "/api/v1/register"),
        json!({ "name": name, "email": email, "password": PASSWORD }),
    );
    send(app, request).await.status()
}

pub async fn login(app: &Router, email: &str, cookie: Option<&str>) -> Response<Body> {
    let mut builder = json_request("POST", "/api/v1/login");
    if let Some(token) = cookie {
        builder = builder.header(header::COOKIE, jwt_cookie(token));
    }
    let request = json_body(builder, json!({ "email": email, "password": PASSWORD }));
    send(app, request).await
}

/// Register and log in. Returns (access_token, refresh_token, user uuid).
pub async fn register_and_login(app: &Router, name: &str, email: &str) -> (String, String, String) {
    assert_eq!(register(app, name, email).await, StatusCode::CREATED);
    let response = login(app, email, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let refresh = issued_refresh_token(&response).expect("login should set the jwt cookie");
    let body = body_json(response).await;
    (
        body["accessToken"].as_str().unwrap().to_string(),
        refresh,
        body["user"]["id"].as_str().unwrap().to_string(),
    )
}

pub async fn refresh(app: &Router, refresh_token: &str) -> Response<Body> {
    let request = get("/api/v1/refresh")
        .header(header::COOKIE, jwt_cookie(refresh_token))
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}

pub async fn stored_tokens(db: &Database, email: &str) -> Vec<String> {
    let user = db.users().get_by_email(email).await.unwrap().unwrap();
    db.tokens().list_by_user(user.id).await.unwrap()
}
