//! Pixel placement endpoint
//!
//! POST /pixel - Place one pixel as an API-key agent

use axum::extract::Extension;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use axum::routing::post;
use axum::Router;
use chrono::{DateTime, Utc};
use plaza_core::{Error, PlacementGateway};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{ApiFailure, ApiResponse};

/// Placement request body
#[derive(Debug, Deserialize)]
pub struct PlacePixelRequest {
    pub x: i64,
    pub y: i64,
    pub color: i64,
}

/// Accepted placement, echoed back to the writer
#[derive(Debug, Serialize)]
pub struct PixelPlaced {
    pub x: u32,
    pub y: u32,
    pub color: u8,
    pub agent_name: String,
    pub timestamp: DateTime<Utc>,
}

/// Place a pixel (requires an agent credential)
async fn place_pixel(
    Extension(gateway): Extension<Arc<PlacementGateway>>,
    headers: HeaderMap,
    Json(request): Json<PlacePixelRequest>,
) -> Result<(StatusCode, Json<ApiResponse<PixelPlaced>>), ApiFailure> {
    let credential = bearer_credential(&headers).ok_or(Error::Unauthenticated)?;

    let placement = gateway
        .place_pixel(&credential, request.x, request.y, request.color)
        .await?;

    let body = ApiResponse::success(PixelPlaced {
        x: placement.update.x,
        y: placement.update.y,
        color: placement.update.color,
        agent_name: placement.update.actor_name.clone(),
        timestamp: placement.update.timestamp,
    })
    .with_retry_after(placement.retry_after_seconds);

    Ok((StatusCode::CREATED, Json(body)))
}

/// Pull the agent credential out of `Authorization: Bearer` or `x-api-key`.
fn bearer_credential(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get("authorization") {
        if let Ok(text) = value.to_str() {
            if let Some(token) = text.strip_prefix("Bearer ") {
                if !token.is_empty() {
                    return Some(token.to_string());
                }
            }
        }
    }
    headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .filter(|k| !k.is_empty())
        .map(|k| k.to_string())
}

/// Create pixel routes
pub fn pixel_routes() -> Router {
    Router::new().route("/pixel", post(place_pixel))
}
