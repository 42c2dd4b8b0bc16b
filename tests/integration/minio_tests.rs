//! Integration tests against a real S3-compatible store (MinIO).
//!
//! # Requirements
//!
//! A MinIO server on `localhost:9000` with the default credentials:
//! ```bash
//! docker run -p 9000:9000 minio/minio server /data
//! export AWS_ACCESS_KEY_ID=minioadmin AWS_SECRET_ACCESS_KEY=minioadmin
//! ```
//!
//! # Running the tests
//!
//! ```bash
//! cargo test --test integration minio -- --ignored
//! ```
//!
//! Marked `#[ignore]` because they need the external service. Each test
//! returns early when MinIO is not reachable.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use bytes::Bytes;
use serde_json::json;
use tower::ServiceExt;

use wsi_slide_service::server::{create_router, RouterConfig, TokenAuth};
use wsi_slide_service::storage::{
    create_s3_client, CompletedPart, RetryPolicy, S3ObjectStore, StorageGateway, MIN_PART_SIZE,
};

use super::test_utils::{
    build_state, decode_jpeg, pyramid_tiff, TestResponse, AUTH_SECRET, WEBHOOK_KEY,
};

const MINIO_ENDPOINT: &str = "http://localhost:9000";
const MINIO_REGION: &str = "us-east-1";
const MINIO_BUCKET: &str = "wsi-slide-service-tests";

async fn is_minio_available() -> bool {
    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
    {
        Ok(c) => c,
        Err(_) => return false,
    };

    client
        .get(format!("{}/minio/health/live", MINIO_ENDPOINT))
        .send()
        .await
        .map(|r| r.status().is_success())
        .unwrap_or(false)
}

/// S3 store over the test bucket, creating it if needed.
async fn minio_store() -> Option<Arc<S3ObjectStore>> {
    if !is_minio_available().await {
        eprintln!("MinIO not reachable at {}, skipping", MINIO_ENDPOINT);
        return None;
    }
    let client = create_s3_client(Some(MINIO_ENDPOINT), MINIO_REGION).await;
    // Already existing is fine
    let _ = client.create_bucket().bucket(MINIO_BUCKET).send().await;
    Some(Arc::new(S3ObjectStore::new(client, MINIO_BUCKET)))
}

#[tokio::test]
#[ignore]
async fn test_minio_multipart_roundtrip() {
    let Some(store) = minio_store().await else {
        return;
    };
    let gateway = StorageGateway::new(store, RetryPolicy::default());
    let key = format!("tests/{}.bin", uuid::Uuid::new_v4());

    let first = Bytes::from(vec![0xA5u8; MIN_PART_SIZE as usize]);
    let second = Bytes::from_static(b"tail of the object");

    let upload = gateway.begin_multipart(&key).await.unwrap();
    // Out of order on purpose
    let tag2 = gateway.upload_part(&upload, 2, second.clone()).await.unwrap();
    let tag1 = gateway.upload_part(&upload, 1, first.clone()).await.unwrap();

    let location = gateway
        .complete_multipart(
            &upload,
            &[
                CompletedPart {
                    part_number: 2,
                    tag: tag2,
                },
                CompletedPart {
                    part_number: 1,
                    tag: tag1,
                },
            ],
        )
        .await
        .unwrap();
    assert_eq!(location.key, key);
    assert_eq!(location.size, (first.len() + second.len()) as u64);

    let tail = gateway
        .get_object(&key, first.len() as u64, second.len() as u64)
        .await
        .unwrap();
    assert_eq!(tail, second);

    gateway.delete(&key).await.unwrap();
    assert!(gateway.head(&key).await.is_err());
    // Deleting twice is not an error
    gateway.delete(&key).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_minio_abort_discards_upload() {
    let Some(store) = minio_store().await else {
        return;
    };
    let gateway = StorageGateway::new(store, RetryPolicy::default());
    let key = format!("tests/{}.bin", uuid::Uuid::new_v4());

    let upload = gateway.begin_multipart(&key).await.unwrap();
    gateway
        .upload_part(&upload, 1, Bytes::from_static(b"abandoned"))
        .await
        .unwrap();
    gateway.abort_multipart(&upload).await.unwrap();
    gateway.abort_multipart(&upload).await.unwrap();
    assert!(gateway.head(&key).await.is_err());
}

#[tokio::test]
#[ignore]
async fn test_minio_upload_and_view_slide() {
    let Some(store) = minio_store().await else {
        return;
    };
    let router = create_router(
        build_state(store, None),
        RouterConfig::new(AUTH_SECRET, WEBHOOK_KEY).with_tracing(false),
    );
    let (token, _) = TokenAuth::new(AUTH_SECRET).issue("alice", Duration::from_secs(600));

    let send = |method: Method, uri: String, body: Body| {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("Authorization", format!("Bearer {}", token))
            .header("Content-Type", "application/json")
            .body(body)
            .unwrap();
        let router = router.clone();
        async move { TestResponse::collect(router.oneshot(request).await.unwrap()).await }
    };

    let tiff = pyramid_tiff(&[(700, 500), (350, 250)], 256);
    let started = send(
        Method::POST,
        "/uploads".to_string(),
        Body::from(
            json!({
                "filename": "minio.svs",
                "name": format!("minio-{}", uuid::Uuid::new_v4()),
                "size": tiff.len(),
            })
            .to_string(),
        ),
    )
    .await;
    assert_eq!(started.status, StatusCode::CREATED, "{}", started.text());
    let session = started.json()["session_id"].as_str().unwrap().to_string();

    let part = send(
        Method::PUT,
        format!("/uploads/{}/parts/1", session),
        Body::from(tiff),
    )
    .await;
    assert_eq!(part.status, StatusCode::OK, "{}", part.text());

    let finished = send(
        Method::POST,
        format!("/uploads/{}/finish", session),
        Body::from("{}"),
    )
    .await;
    assert_eq!(finished.status, StatusCode::CREATED, "{}", finished.text());
    let slide_id = finished.json()["slide_id"].as_str().unwrap().to_string();

    let tile = send(
        Method::GET,
        format!("/viewer/{}_files/10/1_0.jpg", slide_id),
        Body::empty(),
    )
    .await;
    assert_eq!(tile.status, StatusCode::OK, "{}", tile.text());
    assert_eq!(decode_jpeg(&tile.body).dimensions(), (700 - 512, 500));

    let deleted = send(
        Method::DELETE,
        format!("/slides/{}", slide_id),
        Body::empty(),
    )
    .await;
    assert_eq!(deleted.status, StatusCode::NO_CONTENT);
}
