//! Command-line and environment configuration.
//!
//! Every `serve` option can also be set through a `WSI_` environment
//! variable, for example:
//!
//! - `WSI_HOST` / `WSI_PORT` - Bind address (default 0.0.0.0:3000)
//! - `WSI_STORAGE` - `s3` or `memory` (default s3)
//! - `WSI_S3_BUCKET` - Bucket holding uploaded slides (required for s3)
//! - `WSI_S3_ENDPOINT` - Custom endpoint for S3-compatible services
//! - `WSI_AUTH_SECRET` - HMAC secret for bearer tokens (required)
//! - `WSI_WEBHOOK_API_KEY` - Key the inference service sends on callbacks (required)
//! - `WSI_INFERENCE_URL` - Base URL of the inference service
//! - `WSI_CACHE_TILES` - Tile cache size, e.g. `256MB`
//!
//! # Example
//!
//! ```ignore
//! use clap::Parser;
//! use wsi_slide_service::config::{Cli, Command};
//!
//! match Cli::parse().command {
//!     Command::Serve(config) => println!("listening on {}", config.bind_address()),
//!     Command::Token(config) => println!("token for {}", config.user),
//! }
//! ```

use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::io::DEFAULT_BLOCK_SIZE;
use crate::storage::{RetryPolicy, MAX_PART_SIZE, MIN_PART_SIZE};
use crate::tile::{TileEngineConfig, DEFAULT_JPEG_QUALITY, DEFAULT_SLIDE_CACHE_CAPACITY};
use crate::upload::UploadPolicy;

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 3000;

/// Default AWS region.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default number of blocks to cache per open slide.
pub const DEFAULT_BLOCK_CACHE_CAPACITY: usize = 100;

/// Default tile cache size.
pub const DEFAULT_TILE_CACHE_SIZE: &str = "256MB";

/// Default bearer token lifetime for `token` (one day).
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 24 * 60 * 60;

// =============================================================================
// CLI
// =============================================================================

/// WSI Slide Service - resumable slide uploads, Deep Zoom viewing and
/// inference task tracking for Whole Slide Images in object storage.
#[derive(Parser, Debug, Clone)]
#[command(name = "wsi-slide-service")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the HTTP service.
    Serve(ServeConfig),

    /// Mint a bearer token for a user.
    Token(TokenConfig),
}

/// Object store backend.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// Amazon S3 or an S3-compatible service
    S3,
    /// In-process store; contents are lost on exit
    Memory,
}

// =============================================================================
// Serve Command
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct ServeConfig {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "WSI_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "WSI_PORT")]
    pub port: u16,

    // =========================================================================
    // Storage Configuration
    // =========================================================================
    /// Object store backend.
    #[arg(long, value_enum, default_value_t = StorageBackend::S3, env = "WSI_STORAGE")]
    pub storage: StorageBackend,

    /// S3 bucket holding slides and inference results.
    #[arg(long, env = "WSI_S3_BUCKET")]
    pub s3_bucket: Option<String>,

    /// Custom S3 endpoint URL for S3-compatible services (MinIO, etc.).
    #[arg(long, env = "WSI_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// AWS region for S3.
    #[arg(long, default_value = DEFAULT_REGION, env = "WSI_S3_REGION")]
    pub s3_region: String,

    /// Total attempts for transient storage failures.
    #[arg(long, default_value_t = 4, env = "WSI_RETRY_MAX_ATTEMPTS")]
    pub retry_max_attempts: u32,

    /// Delay before the first retry, in milliseconds.
    #[arg(long, default_value_t = 200, env = "WSI_RETRY_BASE_DELAY_MS")]
    pub retry_base_delay_ms: u64,

    /// Ceiling on a single retry delay, in milliseconds.
    #[arg(long, default_value_t = 5000, env = "WSI_RETRY_MAX_DELAY_MS")]
    pub retry_max_delay_ms: u64,

    // =========================================================================
    // Authentication Configuration
    // =========================================================================
    /// Secret key for HMAC-SHA256 bearer tokens.
    #[arg(long, env = "WSI_AUTH_SECRET", hide_env_values = true)]
    pub auth_secret: String,

    /// Key expected in `X-API-Key` on inference callbacks.
    #[arg(long, env = "WSI_WEBHOOK_API_KEY", hide_env_values = true)]
    pub webhook_api_key: String,

    // =========================================================================
    // Inference Service
    // =========================================================================
    /// Base URL of the inference service. Without it, starting inference
    /// fails with 503.
    #[arg(long, env = "WSI_INFERENCE_URL")]
    pub inference_url: Option<String>,

    /// Key sent to the inference service.
    #[arg(long, default_value = "", env = "WSI_INFERENCE_API_KEY", hide_env_values = true)]
    pub inference_api_key: String,

    // =========================================================================
    // Upload Configuration
    // =========================================================================
    /// Accepted file extensions (comma-separated, without the dot).
    #[arg(long, default_value = "svs", env = "WSI_ALLOWED_EXTENSIONS", value_delimiter = ',')]
    pub allowed_extensions: Vec<String>,

    /// Smallest accepted declared size in bytes.
    #[arg(long, default_value_t = 1_048_576, env = "WSI_UPLOAD_MIN_SIZE")]
    pub upload_min_size: u64,

    /// Largest accepted declared size in bytes.
    #[arg(long, default_value_t = 53_687_091_200, env = "WSI_UPLOAD_MAX_SIZE")]
    pub upload_max_size: u64,

    /// Recommended part size in bytes.
    #[arg(long, default_value_t = 104_857_600, env = "WSI_UPLOAD_PART_SIZE")]
    pub upload_part_size: u64,

    /// Largest accepted part body in bytes.
    #[arg(long, default_value_t = 1_073_741_824, env = "WSI_UPLOAD_MAX_PART_SIZE")]
    pub upload_max_part_size: u64,

    /// Idle time after which an open upload session expires.
    #[arg(long, default_value_t = 86_400, env = "WSI_UPLOAD_TTL_SECS")]
    pub upload_ttl_secs: u64,

    /// Interval between sweeps for expired upload sessions.
    #[arg(long, default_value_t = 300, env = "WSI_REAPER_INTERVAL_SECS")]
    pub reaper_interval_secs: u64,

    // =========================================================================
    // Cache Configuration
    // =========================================================================
    /// Maximum number of open slides to keep.
    #[arg(long, default_value_t = DEFAULT_SLIDE_CACHE_CAPACITY, env = "WSI_CACHE_SLIDES")]
    pub cache_slides: usize,

    /// Maximum number of blocks to cache per open slide.
    #[arg(long, default_value_t = DEFAULT_BLOCK_CACHE_CAPACITY, env = "WSI_CACHE_BLOCKS")]
    pub cache_blocks: usize,

    /// Block size in bytes for the block cache.
    #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE, env = "WSI_BLOCK_SIZE")]
    pub block_size: usize,

    /// Tile cache size (e.g. `256MB`, `1GB`).
    #[arg(
        long,
        default_value = DEFAULT_TILE_CACHE_SIZE,
        env = "WSI_CACHE_TILES",
        value_parser = parse_byte_size
    )]
    pub cache_tiles: usize,

    // =========================================================================
    // Tile Configuration
    // =========================================================================
    /// JPEG quality for rendered tiles (1-100).
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY, env = "WSI_JPEG_QUALITY")]
    pub jpeg_quality: u8,

    /// Pad edge tiles to the full tile size.
    #[arg(long, default_value_t = false, env = "WSI_PAD_EDGE_TILES")]
    pub pad_edge_tiles: bool,

    // =========================================================================
    // HTTP Configuration
    // =========================================================================
    /// Cache-Control max-age for viewer responses, in seconds.
    #[arg(long, default_value_t = 3600, env = "WSI_CACHE_MAX_AGE")]
    pub cache_max_age: u32,

    /// Allowed CORS origins (comma-separated). Any origin if unset.
    #[arg(long, env = "WSI_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl ServeConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.auth_secret.trim().is_empty() {
            return Err("Auth secret is required. Set --auth-secret or WSI_AUTH_SECRET".to_string());
        }
        if self.webhook_api_key.trim().is_empty() {
            return Err(
                "Webhook API key is required. Set --webhook-api-key or WSI_WEBHOOK_API_KEY"
                    .to_string(),
            );
        }

        if self.storage == StorageBackend::S3
            && !self
                .s3_bucket
                .as_deref()
                .is_some_and(|b| !b.trim().is_empty())
        {
            return Err("S3 bucket name is required. Set --s3-bucket or WSI_S3_BUCKET".to_string());
        }
        if self.retry_max_attempts == 0 {
            return Err("retry_max_attempts must be greater than 0".to_string());
        }

        if self.allowed_extensions.iter().all(|e| e.trim().is_empty()) {
            return Err("At least one allowed extension is required".to_string());
        }
        if self.upload_min_size > self.upload_max_size {
            return Err("upload_min_size must not exceed upload_max_size".to_string());
        }
        if self.upload_part_size < MIN_PART_SIZE {
            return Err(format!(
                "upload_part_size must be at least {} bytes",
                MIN_PART_SIZE
            ));
        }
        if self.upload_max_part_size < self.upload_part_size
            || self.upload_max_part_size > MAX_PART_SIZE
        {
            return Err(format!(
                "upload_max_part_size must be between upload_part_size and {} bytes",
                MAX_PART_SIZE
            ));
        }
        if self.upload_ttl_secs == 0 || self.reaper_interval_secs == 0 {
            return Err("upload_ttl_secs and reaper_interval_secs must be greater than 0".to_string());
        }

        if self.cache_slides == 0 {
            return Err("cache_slides must be greater than 0".to_string());
        }
        if self.cache_blocks == 0 {
            return Err("cache_blocks must be greater than 0".to_string());
        }
        if self.cache_tiles == 0 {
            return Err("cache_tiles must be greater than 0".to_string());
        }
        if self.block_size < 1024 || self.block_size > 16 * 1024 * 1024 {
            return Err("block_size must be between 1KB and 16MB".to_string());
        }

        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err("jpeg_quality must be between 1 and 100".to_string());
        }

        Ok(())
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }

    pub fn upload_policy(&self) -> UploadPolicy {
        UploadPolicy {
            allowed_extensions: self
                .allowed_extensions
                .iter()
                .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
            min_size: self.upload_min_size,
            max_size: self.upload_max_size,
            part_size: self.upload_part_size,
            max_part_size: self.upload_max_part_size,
            session_ttl: Duration::from_secs(self.upload_ttl_secs),
        }
    }

    pub fn tile_engine_config(&self) -> TileEngineConfig {
        TileEngineConfig {
            jpeg_quality: self.jpeg_quality,
            pad_edge_tiles: self.pad_edge_tiles,
            slide_cache_capacity: self.cache_slides,
            block_size: self.block_size,
            block_cache_capacity: self.cache_blocks,
            tile_cache_bytes: self.cache_tiles,
            ..TileEngineConfig::default()
        }
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }
}

// =============================================================================
// Token Command
// =============================================================================

/// Output format of the `token` command.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenOutputFormat {
    /// Just the token
    #[default]
    Token,
    /// JSON with token, user and expiry
    Json,
}

#[derive(Args, Debug, Clone)]
pub struct TokenConfig {
    /// Secret the server verifies tokens with.
    #[arg(long, env = "WSI_AUTH_SECRET", hide_env_values = true)]
    pub secret: String,

    /// User id the token is issued for.
    #[arg(long)]
    pub user: String,

    /// Token lifetime in seconds.
    #[arg(long, default_value_t = DEFAULT_TOKEN_TTL_SECS)]
    pub ttl: u64,

    #[arg(long, value_enum, default_value_t = TokenOutputFormat::Token)]
    pub format: TokenOutputFormat,
}

impl TokenConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.secret.trim().is_empty() {
            return Err("Secret is required. Set --secret or WSI_AUTH_SECRET".to_string());
        }
        if self.user.trim().is_empty() {
            return Err("User id must not be empty".to_string());
        }
        if self.ttl == 0 {
            return Err("ttl must be greater than 0".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// Size Parsing
// =============================================================================

/// Parse a byte size such as `512`, `64KB`, `256MB` or `1GiB`.
///
/// Units are binary (1KB = 1024 bytes) and case-insensitive.
pub fn parse_byte_size(value: &str) -> Result<usize, String> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (number, unit) = value.split_at(split);
    let number: usize = number
        .parse()
        .map_err(|_| format!("invalid size '{}'", value))?;

    let multiplier: usize = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1024,
        "M" | "MB" | "MIB" => 1024 * 1024,
        "G" | "GB" | "GIB" => 1024 * 1024 * 1024,
        other => return Err(format!("unknown size unit '{}'", other)),
    };

    number
        .checked_mul(multiplier)
        .ok_or_else(|| format!("size '{}' is too large", value))
}

// =============================================================================
// Tests
// =============================================================================
