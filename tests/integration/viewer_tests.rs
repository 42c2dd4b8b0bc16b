//! Deep Zoom viewer integration tests.
//!
//! Tests verify:
//! - DZI descriptor content and headers
//! - Tile rendering at full resolution, downsampled levels and edges
//! - Invalid levels, coordinates and paths
//! - Viewer authentication via header or `?token=`, owner scoping

use axum::body::Body;
use axum::http::{Method, StatusCode};

use super::test_utils::{
    assert_colour_close, decode_jpeg, is_valid_jpeg, pyramid_tiff, TestApp, LEVEL_COLOURS,
};

/// 1000x800 slide: DZI max level 10, two 512px tiles per axis there.
const LEVELS: [(u32, u32); 3] = [(1000, 800), (500, 400), (250, 200)];

async fn app_with_slide() -> (TestApp, String) {
    let app = TestApp::new();
    let tiff = pyramid_tiff(&LEVELS, 256);
    let id = app.upload_slide("alice", "pyramid", &tiff, 8 * 1024).await;
    (app, id)
}

// =============================================================================
// Descriptor
// =============================================================================

#[tokio::test]
async fn test_dzi_descriptor() {
    let (app, id) = app_with_slide().await;

    let response = app.get(&format!("/viewer/{}.dzi", id), "alice").await;
    assert_eq!(response.status, StatusCode::OK, "{}", response.text());
    assert_eq!(response.header("content-type"), Some("application/xml"));
    assert_eq!(
        response.header("cache-control"),
        Some("public, max-age=3600")
    );

    let xml = response.text();
    assert!(xml.contains(r#"TileSize="512""#));
    assert!(xml.contains(r#"Overlap="0""#));
    assert!(xml.contains(r#"Format="jpg""#));
    assert!(xml.contains(r#"<Size Width="1000" Height="800"/>"#));
}

#[tokio::test]
async fn test_dzi_requires_dzi_suffix() {
    let (app, id) = app_with_slide().await;
    let response = app.get(&format!("/viewer/{}.xml", id), "alice").await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

// =============================================================================
// Tiles
// =============================================================================

#[tokio::test]
async fn test_full_resolution_tile() {
    let (app, id) = app_with_slide().await;

    let response = app
        .get(&format!("/viewer/{}_files/10/0_0.jpg", id), "alice")
        .await;
    assert_eq!(response.status, StatusCode::OK, "{}", response.text());
    assert_eq!(response.header("content-type"), Some("image/jpeg"));
    assert_eq!(
        response.header("cache-control"),
        Some("public, max-age=3600")
    );
    assert!(is_valid_jpeg(&response.body));

    let img = decode_jpeg(&response.body);
    assert_eq!(img.dimensions(), (512, 512));
    assert_colour_close(img.get_pixel(256, 256).0, LEVEL_COLOURS[0]);
}

#[tokio::test]
async fn test_edge_tile_has_true_size() {
    let (app, id) = app_with_slide().await;

    let response = app
        .get(&format!("/viewer/{}_files/10/1_1.jpg", id), "alice")
        .await;
    assert_eq!(response.status, StatusCode::OK);
    let img = decode_jpeg(&response.body);
    assert_eq!(img.dimensions(), (1000 - 512, 800 - 512));
}

#[tokio::test]
async fn test_downsampled_levels_read_matching_source_level() {
    let (app, id) = app_with_slide().await;

    // Level 9 is 500x400: served from the 2x source level
    let response = app
        .get(&format!("/viewer/{}_files/9/0_0.jpg", id), "alice")
        .await;
    assert_eq!(response.status, StatusCode::OK);
    let img = decode_jpeg(&response.body);
    assert_eq!(img.dimensions(), (500, 400));
    assert_colour_close(img.get_pixel(250, 200).0, LEVEL_COLOURS[1]);

    // Level 7 is 125x100: scaled down from the 4x source level
    let response = app
        .get(&format!("/viewer/{}_files/7/0_0.jpg", id), "alice")
        .await;
    let img = decode_jpeg(&response.body);
    assert_eq!(img.dimensions(), (125, 100));
    assert_colour_close(img.get_pixel(60, 50).0, LEVEL_COLOURS[2]);

    // Level 0 is a single pixel
    let response = app
        .get(&format!("/viewer/{}_files/0/0_0.jpg", id), "alice")
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(decode_jpeg(&response.body).dimensions(), (1, 1));
}

#[tokio::test]
async fn test_invalid_tile_requests() {
    let (app, id) = app_with_slide().await;

    for path in [
        format!("/viewer/{}_files/11/0_0.jpg", id),
        format!("/viewer/{}_files/10/2_0.jpg", id),
        format!("/viewer/{}_files/10/0_2.jpg", id),
        format!("/viewer/{}_files/x/0_0.jpg", id),
        format!("/viewer/{}_files/10/0-0.jpg", id),
        format!("/viewer/{}_files/10/0_0.png", id),
        format!("/viewer/{}/10/0_0.jpg", id),
        "/viewer/not-a-slide_files/10/0_0.jpg".to_string(),
    ] {
        let response = app.get(&path, "alice").await;
        assert_eq!(response.status, StatusCode::NOT_FOUND, "{}", path);
        assert_eq!(response.json()["error"], "not_found");
    }
}

#[tokio::test]
async fn test_unreadable_slide_is_storage_error() {
    let app = TestApp::new();
    let id = app
        .upload_slide("alice", "garbage", &[0u8; 4096], 4096)
        .await;

    let response = app.get(&format!("/viewer/{}.dzi", id), "alice").await;
    assert_eq!(response.status, StatusCode::BAD_GATEWAY);
    assert_eq!(response.json()["error"], "storage_error");
}

// =============================================================================
// Access
// =============================================================================

#[tokio::test]
async fn test_viewer_requires_auth() {
    let (app, id) = app_with_slide().await;

    let response = app
        .send(
            Method::GET,
            &format!("/viewer/{}.dzi", id),
            None,
            Body::empty(),
        )
        .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.json()["error"], "unauthorized");
}

#[tokio::test]
async fn test_viewer_accepts_query_token() {
    let (app, id) = app_with_slide().await;
    let token = app.token("alice");

    let response = app
        .send(
            Method::GET,
            &format!("/viewer/{}_files/10/0_0.jpg?token={}", id, token),
            None,
            Body::empty(),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);

    let response = app
        .send(
            Method::GET,
            &format!("/viewer/{}.dzi?token={}x", id, token),
            None,
            Body::empty(),
        )
        .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_query_token_not_accepted_by_api_routes() {
    let app = TestApp::new();
    let token = app.token("alice");
    let response = app
        .send(
            Method::GET,
            &format!("/slides?token={}", token),
            None,
            Body::empty(),
        )
        .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_viewer_is_owner_scoped() {
    let (app, id) = app_with_slide().await;

    let dzi = app.get(&format!("/viewer/{}.dzi", id), "bob").await;
    assert_eq!(dzi.status, StatusCode::NOT_FOUND);
    let tile = app
        .get(&format!("/viewer/{}_files/10/0_0.jpg", id), "bob")
        .await;
    assert_eq!(tile.status, StatusCode::NOT_FOUND);
}
