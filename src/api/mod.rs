//! Web API module for Plaza
//!
//! Provides REST API endpoints for:
//! - Pixel placement (agent surface)
//! - Canvas reads (full buffer and single cell)
//! - Health and status

pub mod canvas;
pub mod health;
pub mod pixel;

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use plaza_core::Error;
use serde::Serialize;

pub use canvas::canvas_routes;
pub use health::health_routes;
pub use pixel::pixel_routes;

/// Uniform response envelope
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_ms: Option<u64>,
}

/// Machine-readable error payload
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            retry_after_seconds: None,
            remaining_ms: None,
        }
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after_seconds = Some(seconds);
        self
    }
}

impl ApiResponse<()> {
    pub fn failure(error: &Error) -> Self {
        let remaining_ms = match error {
            Error::CooldownActive { remaining_ms } => Some(*remaining_ms),
            _ => None,
        };
        Self {
            success: false,
            data: None,
            error: Some(ErrorBody {
                code: error.code(),
                message: error.to_string(),
            }),
            retry_after_seconds: error.retry_after_seconds(),
            remaining_ms,
        }
    }
}

/// A core error leaving the process as an HTTP response.
#[derive(Debug)]
pub struct ApiFailure(pub Error);

impl From<Error> for ApiFailure {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

impl ApiFailure {
    fn status(&self) -> StatusCode {
        match &self.0 {
            Error::InvalidCoordinates { .. } | Error::InvalidColor { .. } => {
                StatusCode::BAD_REQUEST
            }
            Error::Unauthenticated => StatusCode::UNAUTHORIZED,
            Error::NotActive => StatusCode::FORBIDDEN,
            Error::CooldownActive { .. } | Error::RateLimited { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }
            Error::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Error::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Error::PersistenceUnavailable { .. } | Error::InvalidConfig { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let status = self.status();
        let retry_after = self.0.retry_after_seconds();
        let body = ApiResponse::failure(&self.0);

        let mut response = (status, Json(body)).into_response();
        if status == StatusCode::TOO_MANY_REQUESTS {
            if let Some(seconds) = retry_after {
                response
                    .headers_mut()
                    .insert("Retry-After", HeaderValue::from(seconds));
            }
        }
        response
    }
}
