//! Health and status endpoints with component-level diagnostics.
//!
//! Provides:
//! - `/health`: liveness plus a shared-store check (for load balancers)
//! - `/status`: observer count, canvas geometry, uptime

use axum::extract::Extension;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use crate::server::ServerContext;
use crate::websocket::BroadcastHub;
use plaza_core::PlacementGateway;

use super::ApiFailure;

/// Health response with per-component checks
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub components: HealthComponents,
}

/// All component health checks
#[derive(Debug, Serialize)]
pub struct HealthComponents {
    pub store: ComponentHealth,
}

/// Individual component health status
#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComponentHealth {
    fn healthy(latency_ms: u64) -> Self {
        Self {
            status: "healthy",
            latency_ms: Some(latency_ms),
            error: None,
        }
    }

    fn unhealthy(error: String) -> Self {
        Self {
            status: "unhealthy",
            latency_ms: None,
            error: Some(error),
        }
    }
}

/// Runtime status response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Connected WebSocket observers on this process
    pub observers: usize,
    pub canvas: CanvasStatus,
    pub uptime_seconds: u64,
}

/// Canvas geometry and version
#[derive(Debug, Serialize)]
pub struct CanvasStatus {
    pub width: u32,
    pub height: u32,
    pub version: u64,
}

/// Health check with shared-store diagnostics
async fn health_check(
    Extension(gateway): Extension<Arc<PlacementGateway>>,
) -> Json<HealthResponse> {
    let start = Instant::now();
    let store = match gateway.store_check().await {
        Ok(()) => ComponentHealth::healthy(start.elapsed().as_millis() as u64),
        Err(e) => ComponentHealth::unhealthy(e.to_string()),
    };

    let status = if store.status == "healthy" {
        "healthy"
    } else {
        "unhealthy"
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        components: HealthComponents { store },
    })
}

/// Runtime status: observers, canvas geometry, uptime
async fn status(
    Extension(gateway): Extension<Arc<PlacementGateway>>,
    Extension(hub): Extension<Arc<BroadcastHub>>,
    Extension(context): Extension<ServerContext>,
) -> Result<Json<StatusResponse>, ApiFailure> {
    let spec = gateway.spec();
    let version = gateway.canvas_version().await?;

    Ok(Json(StatusResponse {
        observers: hub.connection_count(),
        canvas: CanvasStatus {
            width: spec.width,
            height: spec.height,
            version,
        },
        uptime_seconds: context.started.elapsed().as_secs(),
    }))
}

/// Create health routes
pub fn health_routes() -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(status))
}
