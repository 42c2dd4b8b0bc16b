//! WSI Slide Service binary.
//!
//! Starts the HTTP service with all components wired together, or mints a
//! bearer token.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wsi_slide_service::{
    config::{Cli, Command, ServeConfig, StorageBackend, TokenConfig, TokenOutputFormat},
    inference::{HttpInferenceClient, InferenceClient, InferenceService},
    server::{create_router, AppState, RouterConfig, TokenAuth},
    slide::{MemoryCatalog, SlideRegistry},
    storage::{create_s3_client, MemoryObjectStore, ObjectStore, S3ObjectStore, StorageGateway},
    tile::TileEngine,
    upload::UploadManager,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve(config) => run_serve(config).await,
        Command::Token(config) => run_token(config),
    }
}

// =============================================================================
// Serve Command
// =============================================================================

async fn run_serve(config: ServeConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("WSI Slide Service v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");

    let store: Arc<dyn ObjectStore> = match config.storage {
        StorageBackend::S3 => {
            let bucket = config.s3_bucket.clone().unwrap_or_default();
            info!("  Storage: s3 bucket '{}' ({})", bucket, config.s3_region);
            if let Some(ref endpoint) = config.s3_endpoint {
                info!("  S3 endpoint: {}", endpoint);
            }
            let client = create_s3_client(config.s3_endpoint.as_deref(), &config.s3_region).await;
            Arc::new(S3ObjectStore::new(client, bucket))
        }
        StorageBackend::Memory => {
            warn!("  Storage: in-memory - uploaded slides are lost on exit");
            Arc::new(MemoryObjectStore::new())
        }
    };
    let gateway = StorageGateway::new(store, config.retry_policy());

    let inference_client: Option<Arc<dyn InferenceClient>> = match config.inference_url {
        Some(ref url) => match HttpInferenceClient::new(url, config.inference_api_key.clone()) {
            Ok(client) => {
                info!("  Inference service: {}", url);
                Some(Arc::new(client))
            }
            Err(e) => {
                error!("Configuration error: {}", e);
                return ExitCode::FAILURE;
            }
        },
        None => {
            warn!("  Inference service: not configured - starting inference returns 503");
            None
        }
    };

    info!(
        "  Cache: {} slides, {} blocks/slide, {}MB tiles",
        config.cache_slides,
        config.cache_blocks,
        config.cache_tiles / (1024 * 1024)
    );

    let registry = Arc::new(SlideRegistry::new(
        Arc::new(MemoryCatalog::new()),
        gateway.clone(),
    ));
    let uploads = Arc::new(UploadManager::new(
        gateway.clone(),
        Arc::clone(&registry),
        config.upload_policy(),
    ));
    let tiles = TileEngine::attach(Arc::clone(&registry), gateway, config.tile_engine_config());
    let inference = Arc::new(InferenceService::new(
        Arc::clone(&registry),
        inference_client,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reaper = uploads.spawn_reaper(config.reaper_interval(), shutdown_rx);

    let state = AppState {
        uploads,
        registry,
        tiles,
        inference,
        cache_max_age: config.cache_max_age,
    };
    let router = create_router(state, build_router_config(&config));

    let addr = config.bind_address();
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };
    info!("Server listening on http://{}", addr);

    let result = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    let _ = shutdown_tx.send(true);
    if let Err(e) = reaper.await {
        warn!("Session reaper ended abnormally: {}", e);
    }

    if let Err(e) = result {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Server stopped");
    ExitCode::SUCCESS
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "wsi_slide_service=debug,tower_http=debug"
    } else {
        "wsi_slide_service=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build RouterConfig from the application ServeConfig.
fn build_router_config(config: &ServeConfig) -> RouterConfig {
    let mut router_config = RouterConfig::new(&config.auth_secret, &config.webhook_api_key)
        .with_cache_max_age(config.cache_max_age)
        .with_tracing(!config.no_tracing);

    if let Some(ref origins) = config.cors_origins {
        router_config = router_config.with_cors_origins(origins.clone());
    }

    router_config
}

// =============================================================================
// Token Command
// =============================================================================

fn run_token(config: TokenConfig) -> ExitCode {
    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    let auth = TokenAuth::new(&config.secret);
    let (token, expiry) = auth.issue(&config.user, Duration::from_secs(config.ttl));

    match config.format {
        TokenOutputFormat::Token => println!("{}", token),
        TokenOutputFormat::Json => {
            let json = serde_json::json!({
                "token": token,
                "user": config.user,
                "expires_at": expiry,
                "ttl": config.ttl,
            });
            match serde_json::to_string_pretty(&json) {
                Ok(text) => println!("{}", text),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    return ExitCode::FAILURE;
                }
            }
        }
    }

    ExitCode::SUCCESS
}
