//! HTTP layer.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          HTTP Layer                             │
//! │   /uploads   /slides   /inference   /viewer   /health           │
//! │                                                                 │
//! │  ┌─────────────┐  ┌──────────────┐  ┌────────┐  ┌────────────┐  │
//! │  │  handlers   │  │     auth     │  │ error  │  │   routes   │  │
//! │  │ (resources) │  │(bearer, key) │  │ (JSON) │  │  (router)  │  │
//! │  └─────────────┘  └──────────────┘  └────────┘  └────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod auth;
pub mod error;
pub mod handlers;
pub mod routes;

pub use auth::{
    require_api_key, require_bearer, require_viewer_token, ApiKeyAuth, AuthError, AuthUser,
    TokenAuth, API_KEY_HEADER,
};
pub use error::{error_response, status_for, ErrorResponse};
pub use handlers::{health_handler, AppState, HealthResponse, TILE_CACHE_HIT_HEADER};
pub use routes::{create_router, RouterConfig, DEFAULT_CACHE_MAX_AGE};
