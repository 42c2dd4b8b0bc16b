//! Authentication integration tests.
//!
//! Tests verify:
//! - Valid bearer tokens work
//! - Expired tokens are rejected
//! - Tokens signed with another secret or tampered with are rejected
//! - Missing credentials are handled, `/health` stays public

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use tower::ServiceExt;

use wsi_slide_service::server::TokenAuth;

use super::test_utils::{TestApp, TestResponse};

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

async fn get_with_auth(app: &TestApp, uri: &str, authorization: &str) -> TestResponse {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .header("Authorization", authorization)
        .body(Body::empty())
        .unwrap();
    TestResponse::collect(app.router.clone().oneshot(request).await.unwrap()).await
}

// =============================================================================
// Valid Tokens
// =============================================================================

#[tokio::test]
async fn test_valid_token_succeeds() {
    let app = TestApp::new();
    let token = app.token("alice");

    let response = get_with_auth(&app, "/slides", &format!("Bearer {}", token)).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json()["total"], 0);
}

#[tokio::test]
async fn test_token_identifies_user() {
    let app = TestApp::new();
    app.upload_slide("alice", "hers", &[1u8; 32], 32).await;

    let alice = get_with_auth(&app, "/slides", &format!("Bearer {}", app.token("alice"))).await;
    let bob = get_with_auth(&app, "/slides", &format!("Bearer {}", app.token("bob"))).await;
    assert_eq!(alice.json()["total"], 1);
    assert_eq!(bob.json()["total"], 0);
}

// =============================================================================
// Rejected Tokens
// =============================================================================

#[tokio::test]
async fn test_expired_token_rejected() {
    let app = TestApp::new();
    let token = app.tokens.issue_with_expiry("alice", now() - 60);

    let response = get_with_auth(&app, "/slides", &format!("Bearer {}", token)).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.json()["error"], "unauthorized");
    assert_eq!(response.json()["status"], 401);
}

#[tokio::test]
async fn test_token_from_other_secret_rejected() {
    let app = TestApp::new();
    let (token, _) = TokenAuth::new("some-other-secret").issue("alice", Duration::from_secs(600));

    let response = get_with_auth(&app, "/slides", &format!("Bearer {}", token)).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_tampered_token_rejected() {
    let app = TestApp::new();
    let token = app.token("alice");
    // Claim another user with alice's signature
    let forged = token.replacen("alice", "mallory", 1);

    for value in [
        format!("Bearer {}", forged),
        "Bearer not-a-token".to_string(),
        "Bearer ".to_string(),
        format!("Basic {}", token),
    ] {
        let response = get_with_auth(&app, "/slides", &value).await;
        assert_eq!(response.status, StatusCode::UNAUTHORIZED, "{}", value);
    }
}

#[tokio::test]
async fn test_missing_token_rejected_on_every_api_route() {
    let app = TestApp::new();
    for (method, uri) in [
        (Method::GET, "/slides"),
        (Method::POST, "/uploads"),
        (Method::GET, "/uploads/00000000-0000-4000-8000-000000000000"),
        (Method::POST, "/inference"),
        (Method::GET, "/inference/tasks"),
        (Method::POST, "/slides/bulk-delete"),
    ] {
        let response = app.send(method.clone(), uri, None, Body::from("{}")).await;
        assert_eq!(response.status, StatusCode::UNAUTHORIZED, "{} {}", method, uri);
    }
}

#[tokio::test]
async fn test_health_needs_no_token() {
    let app = TestApp::new();
    let response = app
        .send(Method::GET, "/health", None, Body::empty())
        .await;
    assert_eq!(response.status, StatusCode::OK);
}
