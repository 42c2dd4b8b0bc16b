//! Deep Zoom endpoints consumed by tile viewers such as OpenSeadragon.
//!
//! - `GET /viewer/{slide_id}.dzi` - descriptor (XML)
//! - `GET /viewer/{slide_id}_files/{level}/{col}_{row}.jpg` - one tile
//!
//! Both are owner-scoped: a slide that belongs to another user is reported
//! as not found.

use axum::{
    extract::{Path, State},
    http::{header, HeaderName},
    response::{IntoResponse, Response},
    Extension,
};

use super::AppState;
use crate::error::TileError;
use crate::server::auth::AuthUser;
use crate::slide::SlideId;
use crate::tile::parse_tile_name;

/// Response header telling whether a tile came from the tile cache.
pub const TILE_CACHE_HIT_HEADER: HeaderName = HeaderName::from_static("x-tile-cache-hit");

fn invalid_path(path: &str) -> TileError {
    TileError::InvalidTilePath {
        path: path.to_string(),
    }
}

/// Resolve a slide id the caller owns.
async fn owned_slide(state: &AppState, user: &AuthUser, raw: &str) -> Result<SlideId, TileError> {
    let id = SlideId::parse(raw).ok_or_else(|| TileError::SlideNotFound {
        slide_id: raw.to_string(),
    })?;
    state.registry.get(user.id(), id).await?;
    Ok(id)
}

fn cache_control(state: &AppState) -> String {
    format!("public, max-age={}", state.cache_max_age)
}

/// `GET /viewer/{slide_id}.dzi`
///
/// ```xml
/// <Image xmlns="http://schemas.microsoft.com/deepzoom/2008" TileSize="512" Overlap="0" Format="jpg">
///   <Size Width="46000" Height="32914"/>
/// </Image>
/// ```
pub async fn dzi_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(file): Path<String>,
) -> Result<Response, TileError> {
    let raw_id = file.strip_suffix(".dzi").ok_or_else(|| invalid_path(&file))?;
    let id = owned_slide(&state, &user, raw_id).await?;
    let descriptor = state.tiles.get_descriptor(id).await?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/xml".to_string()),
            (header::CACHE_CONTROL, cache_control(&state)),
        ],
        descriptor.to_xml(),
    )
        .into_response())
}

/// `GET /viewer/{slide_id}_files/{level}/{col}_{row}.jpg`
///
/// # Response
///
/// - `200 OK`: JPEG tile, `Content-Type: image/jpeg`
/// - `404 Not Found`: unknown slide, level past the pyramid or tile outside
///   the level's grid
///
/// # Headers
///
/// - `Cache-Control: public, max-age={cache_max_age}`
/// - `X-Tile-Cache-Hit: true|false`
pub async fn tile_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((files, level, tile)): Path<(String, String, String)>,
) -> Result<Response, TileError> {
    let raw_id = files
        .strip_suffix("_files")
        .ok_or_else(|| invalid_path(&files))?;
    let level: u32 = level.parse().map_err(|_| invalid_path(&level))?;
    let (col, row) = parse_tile_name(&tile).ok_or_else(|| invalid_path(&tile))?;

    let id = owned_slide(&state, &user, raw_id).await?;
    let response = state.tiles.get_tile(id, level, col, row).await?;

    Ok((
        [
            (header::CONTENT_TYPE, "image/jpeg".to_string()),
            (header::CACHE_CONTROL, cache_control(&state)),
            (TILE_CACHE_HIT_HEADER, response.cache_hit.to_string()),
        ],
        response.data,
    )
        .into_response())
}
