//! Tests for account registration.

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use common::*;
use serde_json::json;

#[tokio::test]
async fn test_register_returns_created() {
    let (app, db, _) = create_test_app().await;

    let response = send(
        &app,
        json_body(
            json_request("POST", "/api/v1/register"),
            json!({ "name": "Alice", "email": "alice@example.com", "password": PASSWORD }),
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::CREATED);
    assert!(
        extract_set_cookies(&response).is_empty(),
        "Registration should not start a session"
    );
    assert_eq!(body_json(response).await, json!({ "success": true }));

    let user = db
        .users()
        .get_by_email("alice@example.com")
        .await
        .unwrap()
        .expect("user should exist");
    let hash = db.users().get_password_hash(user.id).await.unwrap().unwrap();
    assert_ne!(hash, PASSWORD, "Password must be stored hashed");
}

#[tokio::test]
async fn test_register_duplicate_email() {
    let (app, _, _) = create_test_app().await;

    assert_eq!(
        register(&app, "Alice", "alice@example.com").await,
        StatusCode::CREATED
    );

    let response = send(
        &app,
        json_body(
            json_request("POST", "/api/v1/register"),
            json!({ "name": "Other", "email": "Alice@Example.com", "password": PASSWORD }),
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await,
        json!({ "message": "Email already exist!", "statusCode": 400 })
    );
}

#[tokio::test]
async fn test_register_rejects_invalid_input() {
    let (app, _, _) = create_test_app().await;

    let cases = [
        json!({ "name": "Bob", "email": "not-an-email", "password": PASSWORD }),
        json!({ "name": "Bob", "email": "bob@example.com", "password": "12345" }),
        json!({ "name": "", "email": "bob@example.com", "password": PASSWORD }),
        json!({ "email": "bob@example.com" }),
    ];

    for body in cases {
        let response = send(
            &app,
            json_body(json_request("POST", "/api/v1/register"), body.clone()),
        )
        .await;
        assert_eq!(
            response.status(),
            StatusCode::BAD_REQUEST,
            "Expected 400 for {}",
            body
        );
    }
}

#[tokio::test]
async fn test_register_unreadable_body_uses_error_format() {
    let (app, _, _) = create_test_app().await;

    let malformed = json_request("POST", "/api/v1/register")
        .body(Body::from("{\"name\": "))
        .unwrap();
    let mistyped = json_request("POST", "/api/v1/register")
        .body(Body::from(r#"{"name": 42}"#))
        .unwrap();
    let not_json = Request::builder()
        .method("POST")
        .uri("/api/v1/register")
        .header("x-forwarded-for", TEST_IP)
        .body(Body::from("name=Bob"))
        .unwrap();

    for request in [malformed, mistyped, not_json] {
        let response = send(&app, request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert_eq!(body["statusCode"], 400);
        assert!(body["message"].as_str().is_some_and(|m| !m.is_empty()));
    }
}

#[tokio::test]
async fn test_register_is_rate_limited() {
    let (app, _, _) = create_test_app_with_rate(2).await;

    assert_eq!(register(&app, "A", "a@example.com").await, StatusCode::CREATED);
    assert_eq!(register(&app, "B", "b@example.com").await, StatusCode::CREATED);

    let response = send(
        &app,
        json_body(
            json_request("POST", "/api/v1/register"),
            json!({ "name": "C", "email": "c@example.com", "password": PASSWORD }),
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body_json(response).await["statusCode"], 429);
}
