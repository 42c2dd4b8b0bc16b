//! Test utilities for integration tests.
//!
//! Builds a fully wired router over the in-memory object store, plus
//! helpers for tokens, requests and synthetic pyramidal TIFFs.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, Method, Request, StatusCode};
use axum::Router;
use bytes::Bytes;
use http_body_util::BodyExt;
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use wsi_slide_service::error::InferenceError;
use wsi_slide_service::inference::{
    InferenceClient, InferenceService, Submission, SubmittedTask, TaskState,
};
use wsi_slide_service::server::{create_router, AppState, RouterConfig, TokenAuth};
use wsi_slide_service::slide::{MemoryCatalog, SlideRegistry};
use wsi_slide_service::storage::{MemoryObjectStore, ObjectStore, RetryPolicy, StorageGateway};
use wsi_slide_service::tile::{TileEngine, TileEngineConfig};
use wsi_slide_service::upload::{UploadManager, UploadPolicy};

pub const AUTH_SECRET: &str = "integration-test-secret";
pub const WEBHOOK_KEY: &str = "integration-webhook-key";

/// Solid colour of each pyramid level, level 0 first.
pub const LEVEL_COLOURS: [[u8; 3]; 3] = [[200, 40, 40], [40, 200, 40], [40, 40, 200]];

// =============================================================================
// Mock Inference Client
// =============================================================================

/// Inference client that accepts everything and counts calls.
#[derive(Default)]
pub struct MockInferenceClient {
    submitted: AtomicUsize,
    cancelled: AtomicUsize,
}

impl MockInferenceClient {
    pub fn submit_count(&self) -> usize {
        self.submitted.load(Ordering::SeqCst)
    }

    pub fn cancel_count(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceClient for MockInferenceClient {
    async fn submit(&self, _submission: &Submission) -> Result<SubmittedTask, InferenceError> {
        let n = self.submitted.fetch_add(1, Ordering::SeqCst);
        Ok(SubmittedTask {
            inference_task_id: format!("celery-{}", n),
            state: TaskState::Pending,
        })
    }

    async fn cancel(&self, _external_id: &str) -> Result<TaskState, InferenceError> {
        self.cancelled.fetch_add(1, Ordering::SeqCst);
        Ok(TaskState::Revoked)
    }
}

// =============================================================================
// Test Application
// =============================================================================

/// A wired service over in-memory storage.
pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryObjectStore>,
    pub state: AppState,
    pub inference: Arc<MockInferenceClient>,
    pub tokens: TokenAuth,
}

/// Wire every service over `store` without retries.
pub fn build_state(
    store: Arc<dyn ObjectStore>,
    inference: Option<Arc<dyn InferenceClient>>,
) -> AppState {
    let gateway = StorageGateway::new(store, RetryPolicy::no_retry());
    let registry = Arc::new(SlideRegistry::new(
        Arc::new(MemoryCatalog::new()),
        gateway.clone(),
    ));
    let uploads = Arc::new(UploadManager::new(
        gateway.clone(),
        registry.clone(),
        test_upload_policy(),
    ));
    let tiles = TileEngine::attach(registry.clone(), gateway, TileEngineConfig::default());
    AppState {
        uploads,
        registry: registry.clone(),
        tiles,
        inference: Arc::new(InferenceService::new(registry, inference)),
        cache_max_age: 3600,
    }
}

/// Upload limits small enough for test fixtures.
pub fn test_upload_policy() -> UploadPolicy {
    UploadPolicy {
        allowed_extensions: vec!["svs".to_string()],
        min_size: 16,
        max_size: 16 * 1024 * 1024,
        part_size: 5 * 1024 * 1024,
        max_part_size: 8 * 1024 * 1024,
        session_ttl: Duration::from_secs(3600),
    }
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_inference(true)
    }

    /// Build the app; without `inference` no inference service is configured.
    pub fn with_inference(inference: bool) -> Self {
        let store = Arc::new(MemoryObjectStore::new());
        let client = Arc::new(MockInferenceClient::default());
        let service_client: Option<Arc<dyn InferenceClient>> = if inference {
            Some(client.clone())
        } else {
            None
        };
        let state = build_state(store.clone(), service_client);
        let router = create_router(
            state.clone(),
            RouterConfig::new(AUTH_SECRET, WEBHOOK_KEY).with_tracing(false),
        );

        Self {
            router,
            store,
            state,
            inference: client,
            tokens: TokenAuth::new(AUTH_SECRET),
        }
    }

    pub fn token(&self, user: &str) -> String {
        self.tokens.issue(user, Duration::from_secs(3600)).0
    }

    /// Send a request as `user` (or anonymously) and collect the response.
    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        user: Option<&str>,
        body: Body,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header("Authorization", format!("Bearer {}", self.token(user)));
        }
        let request = builder
            .header("Content-Type", "application/json")
            .body(body)
            .unwrap();
        TestResponse::collect(self.router.clone().oneshot(request).await.unwrap()).await
    }

    pub async fn get(&self, uri: &str, user: &str) -> TestResponse {
        self.send(Method::GET, uri, Some(user), Body::empty()).await
    }

    pub async fn post_json(&self, uri: &str, user: &str, body: serde_json::Value) -> TestResponse {
        self.send(Method::POST, uri, Some(user), Body::from(body.to_string()))
            .await
    }

    /// Start an upload, send `data` in `chunk`-sized parts and finish it.
    ///
    /// Returns the new slide id.
    pub async fn upload_slide(&self, user: &str, name: &str, data: &[u8], chunk: usize) -> String {
        let started = self
            .post_json(
                "/uploads",
                user,
                serde_json::json!({
                    "filename": format!("{}.svs", name),
                    "name": name,
                    "size": data.len(),
                }),
            )
            .await;
        assert_eq!(started.status, StatusCode::CREATED, "{}", started.text());
        let session_id = started.json()["session_id"].as_str().unwrap().to_string();

        for (i, part) in data.chunks(chunk).enumerate() {
            let response = self
                .send(
                    Method::PUT,
                    &format!("/uploads/{}/parts/{}", session_id, i + 1),
                    Some(user),
                    Body::from(part.to_vec()),
                )
                .await;
            assert_eq!(response.status, StatusCode::OK, "{}", response.text());
        }

        let finished = self
            .post_json(
                &format!("/uploads/{}/finish", session_id),
                user,
                serde_json::json!({}),
            )
            .await;
        assert_eq!(finished.status, StatusCode::CREATED, "{}", finished.text());
        finished.json()["slide_id"].as_str().unwrap().to_string()
    }
}

/// A collected response.
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub async fn collect(response: axum::response::Response) -> Self {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

// =============================================================================
// Synthetic Slides
// =============================================================================

pub fn solid_jpeg(width: u32, height: u32, colour: [u8; 3]) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb(colour));
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, 95)
        .encode_image(&img)
        .unwrap();
    buf
}

/// Check if data is a valid JPEG (starts with SOI marker).
pub fn is_valid_jpeg(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0xFF && data[1] == 0xD8
}

pub fn decode_jpeg(data: &[u8]) -> RgbImage {
    image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)
        .unwrap()
        .to_rgb8()
}

pub fn assert_colour_close(pixel: [u8; 3], expected: [u8; 3]) {
    for channel in 0..3 {
        assert!(
            (pixel[channel] as i32 - expected[channel] as i32).abs() < 16,
            "pixel {:?} not close to {:?}",
            pixel,
            expected
        );
    }
}

/// Little-endian pyramidal TIFF with solid-colour JPEG tiles.
///
/// Level `i` is filled with `LEVEL_COLOURS[i]`.
pub fn pyramid_tiff(levels: &[(u32, u32)], tile_size: u32) -> Vec<u8> {
    let mut data = vec![0x49, 0x49, 0x2A, 0x00, 0, 0, 0, 0];
    let mut pointer_at = 4;

    for (level, &(width, height)) in levels.iter().enumerate() {
        let tile = solid_jpeg(tile_size, tile_size, LEVEL_COLOURS[level % LEVEL_COLOURS.len()]);
        let count = width.div_ceil(tile_size) * height.div_ceil(tile_size);

        let mut offsets = Vec::new();
        for _ in 0..count {
            offsets.push(data.len() as u32);
            data.extend_from_slice(&tile);
        }
        let counts = vec![tile.len() as u32; count as usize];

        if data.len() % 2 == 1 {
            data.push(0);
        }
        let offsets_at = data.len() as u32;
        data.extend(offsets.iter().flat_map(|v| v.to_le_bytes()));
        let counts_at = data.len() as u32;
        data.extend(counts.iter().flat_map(|v| v.to_le_bytes()));

        // (tag, type, count, value or offset)
        let entries: [(u16, u16, u32, u32); 8] = [
            (256, 4, 1, width),
            (257, 4, 1, height),
            (259, 3, 1, 7),
            (262, 3, 1, 6),
            (322, 3, 1, tile_size),
            (323, 3, 1, tile_size),
            (324, 4, count, if count == 1 { offsets[0] } else { offsets_at }),
            (325, 4, count, if count == 1 { counts[0] } else { counts_at }),
        ];

        let ifd_offset = data.len() as u32;
        data[pointer_at..pointer_at + 4].copy_from_slice(&ifd_offset.to_le_bytes());
        data.extend_from_slice(&(entries.len() as u16).to_le_bytes());
        for (tag, field_type, count, value) in entries {
            data.extend_from_slice(&tag.to_le_bytes());
            data.extend_from_slice(&field_type.to_le_bytes());
            data.extend_from_slice(&count.to_le_bytes());
            if field_type == 3 {
                data.extend_from_slice(&(value as u16).to_le_bytes());
                data.extend_from_slice(&[0, 0]);
            } else {
                data.extend_from_slice(&value.to_le_bytes());
            }
        }
        pointer_at = data.len();
        data.extend_from_slice(&[0, 0, 0, 0]);
    }
    data
}
