//! Slide registry integration tests.
//!
//! Tests verify:
//! - Listing with pagination, newest first, owner-scoped
//! - Rename rules (uniqueness per owner, empty names)
//! - Delete removing the object, record and inference tasks
//! - Bulk delete with per-id results

use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, StatusCode};
use serde_json::json;

use super::test_utils::{TestApp, TestResponse};

async fn patch_name(app: &TestApp, user: &str, id: &str, name: &str) -> TestResponse {
    app.send(
        Method::PATCH,
        &format!("/slides/{}", id),
        Some(user),
        Body::from(json!({ "name": name }).to_string()),
    )
    .await
}

async fn delete(app: &TestApp, user: &str, id: &str) -> TestResponse {
    app.send(
        Method::DELETE,
        &format!("/slides/{}", id),
        Some(user),
        Body::empty(),
    )
    .await
}

// =============================================================================
// Listing
// =============================================================================

#[tokio::test]
async fn test_list_slides_newest_first_with_pagination() {
    let app = TestApp::new();
    for name in ["first", "second", "third"] {
        app.upload_slide("alice", name, &[9u8; 32], 32).await;
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    app.upload_slide("bob", "other", &[9u8; 32], 32).await;

    let response = app.get("/slides", "alice").await;
    assert_eq!(response.status, StatusCode::OK);
    let body = response.json();
    assert_eq!(body["total"], 3);
    assert_eq!(body["limit"], 20);
    assert_eq!(body["offset"], 0);
    let names: Vec<&str> = body["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["third", "second", "first"]);

    let page = app.get("/slides?limit=1&offset=1", "alice").await.json();
    assert_eq!(page["total"], 3);
    assert_eq!(page["items"].as_array().unwrap().len(), 1);
    assert_eq!(page["items"][0]["name"], "second");
}

#[tokio::test]
async fn test_list_slides_bad_limit() {
    let app = TestApp::new();
    for uri in ["/slides?limit=0", "/slides?limit=101"] {
        let response = app.get(uri, "alice").await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST, "{}", uri);
    }
}

#[tokio::test]
async fn test_slides_are_owner_scoped() {
    let app = TestApp::new();
    let id = app.upload_slide("alice", "mine", &[1u8; 32], 32).await;

    assert_eq!(
        app.get(&format!("/slides/{}", id), "bob").await.status,
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        patch_name(&app, "bob", &id, "stolen").await.status,
        StatusCode::NOT_FOUND
    );
    assert_eq!(delete(&app, "bob", &id).await.status, StatusCode::NOT_FOUND);
    assert_eq!(
        app.get(&format!("/slides/{}", id), "alice").await.status,
        StatusCode::OK
    );
}

// =============================================================================
// Rename
// =============================================================================

#[tokio::test]
async fn test_rename() {
    let app = TestApp::new();
    let id = app.upload_slide("alice", "before", &[1u8; 32], 32).await;
    let other = app.upload_slide("alice", "taken", &[1u8; 32], 32).await;

    let renamed = patch_name(&app, "alice", &id, "  after ").await;
    assert_eq!(renamed.status, StatusCode::OK);
    assert_eq!(renamed.json()["name"], "after");

    // Same name is a no-op
    assert_eq!(
        patch_name(&app, "alice", &id, "after").await.status,
        StatusCode::OK
    );

    let clash = patch_name(&app, "alice", &id, "taken").await;
    assert_eq!(clash.status, StatusCode::BAD_REQUEST);
    assert_eq!(clash.json()["error"], "validation_error");

    let empty = patch_name(&app, "alice", &other, "   ").await;
    assert_eq!(empty.status, StatusCode::BAD_REQUEST);

    // Freed names can be reused
    assert_eq!(
        patch_name(&app, "alice", &other, "before").await.status,
        StatusCode::OK
    );
}

// =============================================================================
// Delete
// =============================================================================

#[tokio::test]
async fn test_delete_slide_cascades() {
    let app = TestApp::new();
    let id = app.upload_slide("alice", "doomed", &[1u8; 32], 32).await;
    let slide = app.get(&format!("/slides/{}", id), "alice").await.json();
    let key = slide["storage_key"].as_str().unwrap().to_string();
    assert!(app.store.contains(&key));

    app.store
        .insert(format!("results/{}.pkl", id), vec![0u8; 4]);
    let task = app
        .post_json("/inference", "alice", json!({ "slide_id": id }))
        .await;
    assert_eq!(task.status, StatusCode::CREATED);
    let task_id = task.json()["id"].as_str().unwrap().to_string();

    let response = delete(&app, "alice", &id).await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);

    assert!(!app.store.contains(&key));
    assert!(!app.store.contains(&format!("results/{}.pkl", id)));
    assert_eq!(
        app.get(&format!("/slides/{}", id), "alice").await.status,
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        app.get(&format!("/inference/tasks/{}", task_id), "alice")
            .await
            .status,
        StatusCode::NOT_FOUND
    );
    assert_eq!(delete(&app, "alice", &id).await.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_bulk_delete() {
    let app = TestApp::new();
    let a = app.upload_slide("alice", "a", &[1u8; 32], 32).await;
    let b = app.upload_slide("alice", "b", &[1u8; 32], 32).await;
    let foreign = app.upload_slide("bob", "c", &[1u8; 32], 32).await;

    let response = app
        .post_json(
            "/slides/bulk-delete",
            "alice",
            json!({ "slide_ids": [a, b, foreign, "garbage"] }),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    let body = response.json();
    assert_eq!(body["deleted_ids"], json!([a, b]));
    let failed: Vec<&str> = body["failed"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["id"].as_str().unwrap())
        .collect();
    assert_eq!(failed, vec![foreign.as_str(), "garbage"]);

    assert_eq!(app.get("/slides", "alice").await.json()["total"], 0);
    assert_eq!(app.get("/slides", "bob").await.json()["total"], 1);
}

#[tokio::test]
async fn test_bulk_delete_bounds() {
    let app = TestApp::new();
    let empty = app
        .post_json("/slides/bulk-delete", "alice", json!({ "slide_ids": [] }))
        .await;
    assert_eq!(empty.status, StatusCode::BAD_REQUEST);

    let ids: Vec<String> = (0..101).map(|i| format!("id-{}", i)).collect();
    let too_many = app
        .post_json("/slides/bulk-delete", "alice", json!({ "slide_ids": ids }))
        .await;
    assert_eq!(too_many.status, StatusCode::BAD_REQUEST);
}
