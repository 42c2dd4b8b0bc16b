//! Upload session integration tests.
//!
//! Tests verify:
//! - The full start / parts / finish flow creates a slide
//! - Out-of-order and idempotent part uploads
//! - Validation and state errors and their HTTP codes
//! - Abort, and that sessions are private to their owner

use axum::body::Body;
use axum::http::{Method, StatusCode};
use serde_json::json;

use wsi_slide_service::storage::Fault;

use super::test_utils::{TestApp, TestResponse};

async fn start(app: &TestApp, user: &str, name: &str, size: usize) -> String {
    let response = app
        .post_json(
            "/uploads",
            user,
            json!({ "filename": "scan.svs", "name": name, "size": size }),
        )
        .await;
    assert_eq!(response.status, StatusCode::CREATED, "{}", response.text());
    response.json()["session_id"].as_str().unwrap().to_string()
}

async fn put_part(
    app: &TestApp,
    user: &str,
    session: &str,
    part: u32,
    data: &[u8],
) -> TestResponse {
    app.send(
        Method::PUT,
        &format!("/uploads/{}/parts/{}", session, part),
        Some(user),
        Body::from(data.to_vec()),
    )
    .await
}

async fn finish(app: &TestApp, user: &str, session: &str) -> TestResponse {
    app.post_json(&format!("/uploads/{}/finish", session), user, json!({}))
        .await
}

// =============================================================================
// Happy Path
// =============================================================================

#[tokio::test]
async fn test_start_upload_response() {
    let app = TestApp::new();
    let response = app
        .post_json(
            "/uploads",
            "alice",
            json!({ "filename": "Biopsy.SVS", "name": "Biopsy 1", "size": 12 * 1024 * 1024 }),
        )
        .await;

    assert_eq!(response.status, StatusCode::CREATED);
    let body = response.json();
    let session_id = body["session_id"].as_str().unwrap();
    assert_eq!(
        body["upload_target_key"],
        format!("slides/{}.svs", session_id)
    );
    assert_eq!(body["part_size"], 5 * 1024 * 1024);
    assert_eq!(body["max_part_size"], 8 * 1024 * 1024);
    assert_eq!(body["num_parts"], 3);
    assert!(body["expires_at"].is_string());
}

#[tokio::test]
async fn test_full_upload_creates_slide() {
    let app = TestApp::new();
    let data: Vec<u8> = (0..300u32).map(|i| (i % 251) as u8).collect();
    let session = start(&app, "alice", "Liver", data.len()).await;

    // Parts arrive out of order
    assert_eq!(
        put_part(&app, "alice", &session, 2, &data[100..200]).await.status,
        StatusCode::OK
    );
    assert_eq!(
        put_part(&app, "alice", &session, 3, &data[200..]).await.status,
        StatusCode::OK
    );
    let first = put_part(&app, "alice", &session, 1, &data[..100]).await;
    assert_eq!(first.status, StatusCode::OK);
    let receipt = first.json();
    assert_eq!(receipt["part_number"], 1);
    assert_eq!(receipt["size"], 100);
    assert!(!receipt["part_tag"].as_str().unwrap().is_empty());

    let snapshot = app.get(&format!("/uploads/{}", session), "alice").await;
    assert_eq!(snapshot.status, StatusCode::OK);
    assert_eq!(snapshot.json()["status"], "open");
    assert_eq!(snapshot.json()["bytes_received"], 300);
    assert_eq!(snapshot.json()["parts"].as_array().unwrap().len(), 3);

    let finished = finish(&app, "alice", &session).await;
    assert_eq!(finished.status, StatusCode::CREATED);
    assert_eq!(finished.json()["status"], "completed");
    let slide_id = finished.json()["slide_id"].as_str().unwrap().to_string();

    let slide = app.get(&format!("/slides/{}", slide_id), "alice").await;
    assert_eq!(slide.status, StatusCode::OK);
    let slide = slide.json();
    assert_eq!(slide["name"], "Liver");
    assert_eq!(slide["size_bytes"], 300);
    assert_eq!(slide["type"], "svs");
    assert!(app
        .store
        .contains(&format!("slides/{}.svs", session)));
    assert_eq!(app.store.pending_uploads(), 0);
}

#[tokio::test]
async fn test_finish_is_idempotent() {
    let app = TestApp::new();
    let session = start(&app, "alice", "Twice", 64).await;
    put_part(&app, "alice", &session, 1, &[7u8; 64]).await;

    let first = finish(&app, "alice", &session).await;
    let second = finish(&app, "alice", &session).await;
    assert_eq!(first.status, StatusCode::CREATED);
    assert_eq!(second.status, StatusCode::CREATED);
    assert_eq!(first.json()["slide_id"], second.json()["slide_id"]);
}

#[tokio::test]
async fn test_resending_identical_part_is_accepted() {
    let app = TestApp::new();
    let session = start(&app, "alice", "Resend", 64).await;

    let first = put_part(&app, "alice", &session, 1, &[1u8; 64]).await;
    let again = put_part(&app, "alice", &session, 1, &[1u8; 64]).await;
    assert_eq!(again.status, StatusCode::OK);
    assert_eq!(first.json()["part_tag"], again.json()["part_tag"]);

    let different = put_part(&app, "alice", &session, 1, &[2u8; 64]).await;
    assert_eq!(different.status, StatusCode::CONFLICT);
    assert_eq!(different.json()["error"], "invalid_state");
}

// =============================================================================
// Validation
// =============================================================================

#[tokio::test]
async fn test_start_upload_validation() {
    let app = TestApp::new();
    let cases = [
        json!({ "filename": "scan.tiff", "name": "a", "size": 1024 }),
        json!({ "filename": "noextension", "name": "a", "size": 1024 }),
        json!({ "filename": "scan.svs", "name": "a", "size": 1 }),
        json!({ "filename": "scan.svs", "name": "a", "size": 1u64 << 40 }),
        json!({ "filename": "scan.svs", "name": "   ", "size": 1024 }),
    ];
    for case in cases {
        let response = app.post_json("/uploads", "alice", case.clone()).await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST, "{}", case);
        assert_eq!(response.json()["error"], "validation_error");
        assert_eq!(response.json()["status"], 400);
    }
    assert_eq!(app.store.call_count("begin_multipart"), 0);
}

#[tokio::test]
async fn test_duplicate_slide_name_rejected() {
    let app = TestApp::new();
    app.upload_slide("alice", "Kidney", &[3u8; 32], 32).await;

    let response = app
        .post_json(
            "/uploads",
            "alice",
            json!({ "filename": "k.svs", "name": "Kidney", "size": 1024 }),
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    // Names are unique per owner only
    let response = app
        .post_json(
            "/uploads",
            "bob",
            json!({ "filename": "k.svs", "name": "Kidney", "size": 1024 }),
        )
        .await;
    assert_eq!(response.status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_bad_part_numbers() {
    let app = TestApp::new();
    let session = start(&app, "alice", "Parts", 64).await;

    for part in ["0", "10001", "abc"] {
        let response = app
            .send(
                Method::PUT,
                &format!("/uploads/{}/parts/{}", session, part),
                Some("alice"),
                Body::from(vec![1u8; 8]),
            )
            .await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST, "part {}", part);
    }

    let empty = put_part(&app, "alice", &session, 1, &[]).await;
    assert_eq!(empty.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_part_over_body_limit_rejected() {
    let app = TestApp::new();
    let session = start(&app, "alice", "Huge", 9 * 1024 * 1024).await;

    let limit = 8 * 1024 * 1024;

    let response = put_part(&app, "alice", &session, 1, &vec![0u8; limit + 1]).await;
    assert_eq!(response.status, StatusCode::PAYLOAD_TOO_LARGE);

    // A part at the limit goes through
    let response = put_part(&app, "alice", &session, 1, &vec![0u8; limit]).await;
    assert_eq!(response.status, StatusCode::OK, "{}", response.text());
}

#[tokio::test]
async fn test_finish_with_missing_parts() {
    let app = TestApp::new();
    let session = start(&app, "alice", "Gappy", 96).await;

    let response = finish(&app, "alice", &session).await;
    assert_eq!(response.status, StatusCode::CONFLICT);

    put_part(&app, "alice", &session, 1, &[1u8; 32]).await;
    put_part(&app, "alice", &session, 3, &[1u8; 32]).await;
    let response = finish(&app, "alice", &session).await;
    assert_eq!(response.status, StatusCode::CONFLICT);
    assert!(response.json()["message"].as_str().unwrap().contains("missing"));

    // Still open, so the gap can be filled
    put_part(&app, "alice", &session, 2, &[1u8; 32]).await;
    assert_eq!(
        finish(&app, "alice", &session).await.status,
        StatusCode::CREATED
    );
}

#[tokio::test]
async fn test_finish_requires_declared_size() {
    let app = TestApp::new();
    let session = start(&app, "alice", "Short", 64).await;
    put_part(&app, "alice", &session, 1, &[1u8; 40]).await;

    let response = finish(&app, "alice", &session).await;
    assert_eq!(response.status, StatusCode::CONFLICT);
    assert!(response.json()["message"]
        .as_str()
        .unwrap()
        .contains("received 40 of 64"));

    // Past the declared size is a validation error
    let over = put_part(&app, "alice", &session, 2, &[1u8; 32]).await;
    assert_eq!(over.status, StatusCode::BAD_REQUEST);

    let tail = put_part(&app, "alice", &session, 2, &[1u8; 24]).await;
    assert_eq!(tail.status, StatusCode::OK);
    assert_eq!(
        finish(&app, "alice", &session).await.status,
        StatusCode::CREATED
    );
}

#[tokio::test]
async fn test_unknown_session() {
    let app = TestApp::new();
    for uri in [
        "/uploads/not-a-uuid",
        "/uploads/00000000-0000-4000-8000-000000000000",
    ] {
        let response = app.get(uri, "alice").await;
        assert_eq!(response.status, StatusCode::NOT_FOUND);
    }
}

// =============================================================================
// Abort and Ownership
// =============================================================================

#[tokio::test]
async fn test_abort_discards_parts() {
    let app = TestApp::new();
    let session = start(&app, "alice", "Aborted", 64).await;
    put_part(&app, "alice", &session, 1, &[1u8; 64]).await;
    assert_eq!(app.store.pending_uploads(), 1);

    let response = app
        .post_json(&format!("/uploads/{}/abort", session), "alice", json!({}))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json()["status"], "aborted");
    assert_eq!(response.json()["session_id"], session);
    assert_eq!(app.store.pending_uploads(), 0);

    // Idempotent
    let again = app
        .post_json(&format!("/uploads/{}/abort", session), "alice", json!({}))
        .await;
    assert_eq!(again.status, StatusCode::OK);

    let part = put_part(&app, "alice", &session, 2, &[1u8; 8]).await;
    assert_eq!(part.status, StatusCode::CONFLICT);
    assert_eq!(
        finish(&app, "alice", &session).await.status,
        StatusCode::CONFLICT
    );
}

#[tokio::test]
async fn test_abort_after_completion_is_conflict() {
    let app = TestApp::new();
    let session = start(&app, "alice", "Done", 64).await;
    put_part(&app, "alice", &session, 1, &[1u8; 64]).await;
    finish(&app, "alice", &session).await;

    let response = app
        .post_json(&format!("/uploads/{}/abort", session), "alice", json!({}))
        .await;
    assert_eq!(response.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_sessions_are_private() {
    let app = TestApp::new();
    let session = start(&app, "alice", "Private", 64).await;

    assert_eq!(
        app.get(&format!("/uploads/{}", session), "bob").await.status,
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        put_part(&app, "bob", &session, 1, &[1u8; 8]).await.status,
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        finish(&app, "bob", &session).await.status,
        StatusCode::NOT_FOUND
    );
}

// =============================================================================
// Storage Failures
// =============================================================================

#[tokio::test]
async fn test_transient_part_failure_keeps_session_open() {
    let app = TestApp::new();
    let session = start(&app, "alice", "Flaky", 64).await;

    app.store.inject_fault("upload_part", Fault::Transient);
    let failed = put_part(&app, "alice", &session, 1, &[1u8; 64]).await;
    assert_eq!(failed.status, StatusCode::SERVICE_UNAVAILABLE);

    let retried = put_part(&app, "alice", &session, 1, &[1u8; 64]).await;
    assert_eq!(retried.status, StatusCode::OK);
    assert_eq!(
        finish(&app, "alice", &session).await.status,
        StatusCode::CREATED
    );
}

#[tokio::test]
async fn test_permanent_completion_failure_aborts() {
    let app = TestApp::new();
    let session = start(&app, "alice", "Refused", 64).await;
    put_part(&app, "alice", &session, 1, &[1u8; 64]).await;

    app.store.inject_fault("complete_multipart", Fault::Permanent);
    let response = finish(&app, "alice", &session).await;
    assert_eq!(response.status, StatusCode::BAD_GATEWAY);

    let snapshot = app.get(&format!("/uploads/{}", session), "alice").await;
    assert_eq!(snapshot.json()["status"], "aborted");
    assert_eq!(app.store.pending_uploads(), 0);
}
