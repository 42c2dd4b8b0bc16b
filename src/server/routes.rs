//! Router configuration.
//!
//! # Route Structure
//!
//! ```text
//! /health                                          - Health check (public)
//!
//! /uploads                                  POST   - Open an upload session
//! /uploads/{session_id}                     GET    - Session snapshot
//! /uploads/{session_id}/parts/{part_number} PUT    - Upload one part
//! /uploads/{session_id}/finish              POST   - Complete, creating the slide
//! /uploads/{session_id}/abort               POST   - Abort and discard parts
//!
//! /slides                                   GET    - List own slides
//! /slides/{id}                              GET, PATCH, DELETE
//! /slides/{id}/tasks                        GET    - Inference tasks of a slide
//! /slides/bulk-delete                       POST
//!
//! /inference                                POST   - Start an inference task
//! /inference/tasks                          GET    - List tasks
//! /inference/tasks/{id}                     GET
//! /inference/tasks/{id}/cancel              POST
//! /inference/webhook/callback               POST   - X-API-Key, not bearer
//!
//! /viewer/{slide_id}.dzi                    GET    - bearer or ?token=
//! /viewer/{slide_id}_files/{level}/{col}_{row}.jpg
//! ```
//!
//! # Example
//!
//! ```ignore
//! let config = RouterConfig::new("auth-secret", "webhook-key")
//!     .with_cors_origins(vec!["https://viewer.example.com".to_string()]);
//! let router = create_router(app_state, config);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, router).await?;
//! ```

use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post, put},
    Router,
};
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderName, Method};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::auth::{require_api_key, require_bearer, require_viewer_token, ApiKeyAuth, TokenAuth};
use super::handlers::{
    abort_upload_handler, bulk_delete_handler, callback_handler, cancel_task_handler,
    delete_slide_handler, dzi_handler, finish_upload_handler, get_slide_handler,
    get_task_handler, get_upload_handler, health_handler, list_slides_handler,
    list_tasks_handler, rename_slide_handler, slide_tasks_handler, start_inference_handler,
    start_upload_handler, tile_handler, upload_part_handler, AppState, TILE_CACHE_HIT_HEADER,
};

/// Default Cache-Control max-age for viewer responses.
pub const DEFAULT_CACHE_MAX_AGE: u32 = 3600;

// =============================================================================
// Router Configuration
// =============================================================================

/// Configuration for the HTTP router.
#[derive(Clone)]
pub struct RouterConfig {
    /// Secret for bearer token verification
    pub auth_secret: String,

    /// Key the inference service sends with callbacks
    pub webhook_api_key: String,

    /// Allowed CORS origins (None = allow any origin)
    pub cors_origins: Option<Vec<String>>,

    /// Cache-Control max-age in seconds
    pub cache_max_age: u32,

    /// Whether to enable request tracing
    pub enable_tracing: bool,
}

impl RouterConfig {
    /// By default:
    /// - CORS allows any origin
    /// - Cache max-age is 1 hour (3600 seconds)
    /// - Tracing is enabled
    pub fn new(auth_secret: impl Into<String>, webhook_api_key: impl Into<String>) -> Self {
        Self {
            auth_secret: auth_secret.into(),
            webhook_api_key: webhook_api_key.into(),
            cors_origins: None,
            cache_max_age: DEFAULT_CACHE_MAX_AGE,
            enable_tracing: true,
        }
    }

    /// Set specific allowed CORS origins.
    ///
    /// Pass an empty vec to disallow all cross-origin requests.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    /// Allow any CORS origin.
    pub fn with_cors_any_origin(mut self) -> Self {
        self.cors_origins = None;
        self
    }

    /// Set the Cache-Control max-age in seconds.
    pub fn with_cache_max_age(mut self, seconds: u32) -> Self {
        self.cache_max_age = seconds;
        self
    }

    /// Enable or disable request tracing.
    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }
}

// =============================================================================
// Router Builder
// =============================================================================

/// Create the application router.
///
/// `state.cache_max_age` is overwritten by the config's value. Part bodies
/// are limited to the upload policy's `max_part_size`.
pub fn create_router(mut state: AppState, config: RouterConfig) -> Router {
    state.cache_max_age = config.cache_max_age;
    let part_limit = usize::try_from(state.uploads.policy().max_part_size).unwrap_or(usize::MAX);
    let tokens = TokenAuth::new(&config.auth_secret);
    let api_key = ApiKeyAuth::new(&config.webhook_api_key);

    let api_routes = Router::new()
        .route("/uploads", post(start_upload_handler))
        .route("/uploads/{session_id}", get(get_upload_handler))
        .route(
            "/uploads/{session_id}/parts/{part_number}",
            put(upload_part_handler).layer(DefaultBodyLimit::max(part_limit)),
        )
        .route("/uploads/{session_id}/finish", post(finish_upload_handler))
        .route("/uploads/{session_id}/abort", post(abort_upload_handler))
        .route("/slides", get(list_slides_handler))
        .route("/slides/bulk-delete", post(bulk_delete_handler))
        .route(
            "/slides/{id}",
            get(get_slide_handler)
                .patch(rename_slide_handler)
                .delete(delete_slide_handler),
        )
        .route("/slides/{id}/tasks", get(slide_tasks_handler))
        .route("/inference", post(start_inference_handler))
        .route("/inference/tasks", get(list_tasks_handler))
        .route("/inference/tasks/{id}", get(get_task_handler))
        .route("/inference/tasks/{id}/cancel", post(cancel_task_handler))
        .route_layer(middleware::from_fn_with_state(
            tokens.clone(),
            require_bearer,
        ));

    // Viewer image requests cannot set headers, so ?token= is accepted here
    let viewer_routes = Router::new()
        .route("/viewer/{file}", get(dzi_handler))
        .route("/viewer/{files}/{level}/{tile}", get(tile_handler))
        .route_layer(middleware::from_fn_with_state(
            tokens,
            require_viewer_token,
        ));

    let webhook_routes = Router::new()
        .route("/inference/webhook/callback", post(callback_handler))
        .route_layer(middleware::from_fn_with_state(api_key, require_api_key));

    let router = Router::new()
        .route("/health", get(health_handler))
        .merge(api_routes)
        .merge(viewer_routes)
        .merge(webhook_routes)
        .with_state(state)
        .layer(build_cors_layer(&config));

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

/// Build the CORS layer based on configuration.
fn build_cors_layer(config: &RouterConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::HEAD,
            Method::OPTIONS,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([
            AUTHORIZATION,
            CONTENT_TYPE,
            HeaderName::from_static("x-api-key"),
        ])
        .expose_headers([TILE_CACHE_HIT_HEADER])
        .max_age(Duration::from_secs(86400)); // 24 hours

    match &config.cors_origins {
        None => cors.allow_origin(Any),
        Some(origins) if origins.is_empty() => cors,
        Some(origins) => {
            let parsed_origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            cors.allow_origin(parsed_origins)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
