//! Canvas read endpoints
//!
//! GET /canvas - Full packed buffer, base64-encoded
//! GET /canvas/pixel - One cell's color

use axum::extract::{Extension, Query};
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Utc};
use plaza_core::{encode_canvas, PlacementGateway};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{ApiFailure, ApiResponse};

/// Full canvas payload
#[derive(Debug, Serialize)]
pub struct CanvasPayload {
    /// Packed 4-bit buffer, base64
    pub data: String,
    pub version: u64,
    pub timestamp: DateTime<Utc>,
}

/// Single-cell query
#[derive(Debug, Deserialize)]
pub struct CellQuery {
    pub x: i64,
    pub y: i64,
}

/// Single-cell payload
#[derive(Debug, Serialize)]
pub struct CellPayload {
    pub x: u32,
    pub y: u32,
    pub color: u8,
}

/// Fetch the whole canvas
async fn get_canvas(
    Extension(gateway): Extension<Arc<PlacementGateway>>,
) -> Result<Json<ApiResponse<CanvasPayload>>, ApiFailure> {
    let snapshot = gateway.canvas_snapshot().await?;
    Ok(Json(ApiResponse::success(CanvasPayload {
        data: encode_canvas(&snapshot.buffer),
        version: snapshot.version,
        timestamp: Utc::now(),
    })))
}

/// Fetch one cell
async fn get_pixel(
    Extension(gateway): Extension<Arc<PlacementGateway>>,
    Query(query): Query<CellQuery>,
) -> Result<Json<ApiResponse<CellPayload>>, ApiFailure> {
    let color = gateway.read_cell(query.x, query.y).await?;
    // read_cell validated the coordinates, so the casts cannot wrap.
    Ok(Json(ApiResponse::success(CellPayload {
        x: query.x as u32,
        y: query.y as u32,
        color,
    })))
}

/// Create canvas routes
pub fn canvas_routes() -> Router {
    Router::new()
        .route("/canvas", get(get_canvas))
        .route("/canvas/pixel", get(get_pixel))
}
