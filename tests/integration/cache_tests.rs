//! Tile cache integration tests.
//!
//! Tests verify:
//! - Repeated tile requests are cache hits and skip storage
//! - Cache occupancy reported by `/health`
//! - Deleting a slide empties its cache entries

use axum::body::Body;
use axum::http::{Method, StatusCode};

use wsi_slide_service::server::{create_router, RouterConfig};

use super::test_utils::{pyramid_tiff, TestApp, AUTH_SECRET, WEBHOOK_KEY};

const LEVELS: [(u32, u32); 2] = [(600, 600), (300, 300)];

async fn health(app: &TestApp) -> serde_json::Value {
    let response = app
        .send(Method::GET, "/health", None, Body::empty())
        .await;
    assert_eq!(response.status, StatusCode::OK);
    response.json()
}

#[tokio::test]
async fn test_health_is_public() {
    let app = TestApp::new();
    let body = health(&app).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(body["upload_sessions"], 0);
    assert_eq!(body["cache"]["open_slides"], 0);
    assert_eq!(body["cache"]["tiles"]["entries"], 0);
}

#[tokio::test]
async fn test_repeated_tile_is_cache_hit() {
    let app = TestApp::new();
    let id = app
        .upload_slide("alice", "cached", &pyramid_tiff(&LEVELS, 256), 16 * 1024)
        .await;
    let uri = format!("/viewer/{}_files/10/0_0.jpg", id);

    let first = app.get(&uri, "alice").await;
    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(first.header("x-tile-cache-hit"), Some("false"));
    let reads = app.store.call_count("get_range");

    let second = app.get(&uri, "alice").await;
    assert_eq!(second.header("x-tile-cache-hit"), Some("true"));
    assert_eq!(first.body, second.body);
    assert_eq!(app.store.call_count("get_range"), reads);

    // A different tile of the same slide is rendered, not served from cache
    let other = app
        .get(&format!("/viewer/{}_files/10/1_1.jpg", id), "alice")
        .await;
    assert_eq!(other.header("x-tile-cache-hit"), Some("false"));

    let stats = health(&app).await;
    assert_eq!(stats["cache"]["open_slides"], 1);
    assert_eq!(stats["cache"]["tiles"]["entries"], 2);
    assert_eq!(stats["cache"]["tiles"]["in_flight"], 0);
    assert!(stats["cache"]["tiles"]["size"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn test_delete_invalidates_cache() {
    let app = TestApp::new();
    let keep = app
        .upload_slide("alice", "kept", &pyramid_tiff(&LEVELS, 256), 16 * 1024)
        .await;
    let gone = app
        .upload_slide("alice", "gone", &pyramid_tiff(&LEVELS, 256), 16 * 1024)
        .await;

    for id in [&keep, &gone] {
        let response = app
            .get(&format!("/viewer/{}_files/9/0_0.jpg", id), "alice")
            .await;
        assert_eq!(response.status, StatusCode::OK);
    }
    assert_eq!(health(&app).await["cache"]["tiles"]["entries"], 2);

    let deleted = app
        .send(
            Method::DELETE,
            &format!("/slides/{}", gone),
            Some("alice"),
            Body::empty(),
        )
        .await;
    assert_eq!(deleted.status, StatusCode::NO_CONTENT);

    let stats = health(&app).await;
    assert_eq!(stats["cache"]["tiles"]["entries"], 1);
    assert_eq!(stats["cache"]["open_slides"], 1);

    let tile = app
        .get(&format!("/viewer/{}_files/9/0_0.jpg", gone), "alice")
        .await;
    assert_eq!(tile.status, StatusCode::NOT_FOUND);

    let kept = app
        .get(&format!("/viewer/{}_files/9/0_0.jpg", keep), "alice")
        .await;
    assert_eq!(kept.header("x-tile-cache-hit"), Some("true"));
}

#[tokio::test]
async fn test_cache_control_follows_router_config() {
    let app = TestApp::new();
    let id = app
        .upload_slide("alice", "max-age", &pyramid_tiff(&LEVELS, 256), 16 * 1024)
        .await;

    let router = create_router(
        app.state.clone(),
        RouterConfig::new(AUTH_SECRET, WEBHOOK_KEY)
            .with_cache_max_age(60)
            .with_tracing(false),
    );
    let app = TestApp { router, ..app };

    let response = app.get(&format!("/viewer/{}.dzi", id), "alice").await;
    assert_eq!(response.header("cache-control"), Some("public, max-age=60"));
}
